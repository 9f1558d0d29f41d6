//! Neighborhood context refinement
//!
//! Each stage concatenates the per-neighbor embedding with a distance-weighted
//! max-pool over the whole neighborhood, so every neighbor's kernel weight sees
//! the shape of its neighborhood, and projects 2M channels back to M:
//!
//! ```text
//! E [B, M, N, K] --(* w, max over K, broadcast)--> P [B, M, N, K]
//! cat(E, P) [B, 2M, N, K] -> conv 1x1 -> (InstanceNorm) -> ReLU -> [B, M, N, K]
//! ```
//!
//! The max-pool is order-invariant over K, so the stage is permutation
//! equivariant in the neighbors.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, VarBuilder};

use crate::config::INSTANCE_NORM_EPS;
use crate::model::instance_norm::InstanceNorm;

#[derive(Debug, Clone)]
pub struct ContextRefinement {
    fc: Conv2d,
    norm: Option<InstanceNorm>,
}

impl ContextRefinement {
    /// # Arguments
    /// * `vb` - VarBuilder at the layer root
    /// * `fc_name` - prefix of the 2M -> M pointwise conv weight
    /// * `norm_name` - prefix of the instance norm, `None` for a plain ReLU stage
    /// * `kernel_size` - M
    pub fn load(
        vb: VarBuilder,
        fc_name: &str,
        norm_name: Option<&str>,
        kernel_size: usize,
    ) -> Result<Self> {
        let fc = candle_nn::conv2d_no_bias(
            2 * kernel_size,
            kernel_size,
            1,
            Default::default(),
            vb.pp(fc_name),
        )?;
        let norm = norm_name
            .map(|name| InstanceNorm::load(vb.pp(name), kernel_size, INSTANCE_NORM_EPS))
            .transpose()?;
        Ok(Self { fc, norm })
    }

    /// # Arguments
    /// * `embedding` - [B, M, N, K]
    /// * `distance_weight` - [B, 1, N, K]
    pub fn forward(&self, embedding: &Tensor, distance_weight: &Tensor) -> Result<Tensor> {
        let pooled = embedding
            .broadcast_mul(distance_weight)?
            .max_keepdim(3)?
            .broadcast_as(embedding.shape())?
            .contiguous()?;

        let x = Tensor::cat(&[embedding, &pooled], 1)?;
        let x = self.fc.forward(&x)?;
        let x = match &self.norm {
            Some(norm) => norm.forward(&x)?,
            None => x,
        };
        x.relu()
    }
}

/// Last refinement stage, whose output is re-weighted by neighbor distance to
/// give the dynamic kernel [B, M, N, K].
#[derive(Debug, Clone)]
pub struct KernelWeightFinalizer {
    stage: ContextRefinement,
}

impl KernelWeightFinalizer {
    /// Weight path: fc3.weight
    pub fn load(vb: VarBuilder, kernel_size: usize) -> Result<Self> {
        let stage = ContextRefinement::load(vb, "fc3", None, kernel_size)?;
        Ok(Self { stage })
    }

    pub fn forward(&self, embedding: &Tensor, distance_weight: &Tensor) -> Result<Tensor> {
        self.stage
            .forward(embedding, distance_weight)?
            .broadcast_mul(distance_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_pooled_context_is_neighbor_order_invariant() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let stage = ContextRefinement::load(vb, "fc2", Some("bn2"), 4).unwrap();

        let embedding = Tensor::rand(0.0f32, 1.0, (1, 4, 3, 5), &device).unwrap();
        let weight = Tensor::rand(0.5f32, 1.5, (1, 1, 3, 5), &device).unwrap();
        let out = stage.forward(&embedding, &weight).unwrap();
        assert_eq!(out.dims(), &[1, 4, 3, 5]);

        // Permuting neighbors permutes the output the same way
        let perm = Tensor::new(&[4u32, 2, 0, 3, 1], &device).unwrap();
        let out_perm = stage
            .forward(
                &embedding.index_select(&perm, 3).unwrap(),
                &weight.index_select(&perm, 3).unwrap(),
            )
            .unwrap();
        let expected = out.index_select(&perm, 3).unwrap();
        let diff: f32 = (out_perm - expected)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "max diff {diff}");
    }

    #[test]
    fn test_finalizer_zero_weight_gives_zero_kernel() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let finalizer = KernelWeightFinalizer::load(vb, 4).unwrap();

        let embedding = Tensor::rand(0.0f32, 1.0, (1, 4, 2, 3), &device).unwrap();
        let weight = Tensor::zeros((1, 1, 2, 3), DType::F32, &device).unwrap();
        let mat = finalizer.forward(&embedding, &weight).unwrap();
        assert_eq!(mat.dims(), &[1, 4, 2, 3]);
        let max: f32 = mat.abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert_eq!(max, 0.0);
    }
}
