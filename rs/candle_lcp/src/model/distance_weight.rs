//! Distance-based neighbor importance
//!
//! Each neighbor gets a soft weight `sigmoid(-alpha * d + beta)` from its
//! distance `d` to the support point. Weights are then rescaled per
//! neighborhood so that they sum to the neighbor count K, which keeps
//! neighborhoods of different sizes comparable.
//!
//! Shapes:
//! - distances: [B, N, K]
//! - output:    [B, 1, N, K]

use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::config::DISTANCE_WEIGHT_EPS;

/// Learnable sigmoid weighting of neighbor distances
#[derive(Debug, Clone)]
pub struct DistanceWeighting {
    alpha: Tensor,
    beta: Tensor,
}

impl DistanceWeighting {
    /// Loads `alpha` and `beta`, both of shape [1] and initialized to 1.
    pub fn load(vb: VarBuilder) -> Result<Self> {
        let alpha = vb.get_with_hints(1, "alpha", Init::Const(1.0))?;
        let beta = vb.get_with_hints(1, "beta", Init::Const(1.0))?;
        Ok(Self { alpha, beta })
    }

    pub fn new(alpha: Tensor, beta: Tensor) -> Self {
        Self { alpha, beta }
    }

    pub fn alpha(&self) -> &Tensor {
        &self.alpha
    }

    pub fn beta(&self) -> &Tensor {
        &self.beta
    }

    pub fn forward(&self, distances: &Tensor) -> Result<Tensor> {
        let num_neighbors = distances.dim(2)?;

        // alpha and beta are not clamped: alpha <= 0 simply favors far neighbors
        let logits = distances
            .broadcast_mul(&self.alpha)?
            .neg()?
            .broadcast_add(&self.beta)?;
        let weight = candle_nn::ops::sigmoid(&logits)?;

        // Neighborhoods whose weights all vanish would divide by zero: bump
        // their total by one so they come out as (finite) zeros.
        let total = weight.sum_keepdim(2)?;
        let empty = total.detach().eq(0f64)?.to_dtype(total.dtype())?;
        let total = ((total + empty)? + DISTANCE_WEIGHT_EPS)?;

        (weight.broadcast_div(&total)? * num_neighbors as f64)?.unsqueeze(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn weighting(alpha: f32, beta: f32) -> DistanceWeighting {
        let device = Device::Cpu;
        DistanceWeighting::new(
            Tensor::new(&[alpha], &device).unwrap(),
            Tensor::new(&[beta], &device).unwrap(),
        )
    }

    #[test]
    fn test_reference_values() {
        // sigmoid(-[1, 2, 3]) = [0.2689, 0.1192, 0.0474], sum 0.4355
        let distances = Tensor::new(&[[[1.0f32, 2.0, 3.0]]], &Device::Cpu).unwrap();
        let weight = weighting(1.0, 0.0).forward(&distances).unwrap();
        assert_eq!(weight.dims(), &[1, 1, 1, 3]);

        let values: Vec<f32> = weight.flatten_all().unwrap().to_vec1().unwrap();
        let expected = [1.853f32, 0.821, 0.326];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-3, "expected {e}, got {v}");
        }
        let total: f32 = values.iter().sum();
        assert!((total - 3.0).abs() < 1e-4, "total weight {total}");
    }

    #[test]
    fn test_mass_equals_neighbor_count() {
        let device = Device::Cpu;
        let distances = Tensor::rand(0.0f32, 2.0, (2, 4, 7), &device).unwrap();
        let weight = weighting(1.0, 0.5).forward(&distances).unwrap();
        let totals: Vec<f32> = weight
            .sum(3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for total in totals {
            assert!((total - 7.0).abs() < 1e-4, "total weight {total}");
        }
    }

    #[test]
    fn test_zero_mass_neighborhood_is_isolated() {
        let device = Device::Cpu;
        // Second neighborhood is so far away that every sigmoid underflows to 0
        let distances =
            Tensor::new(&[[[1.0f32, 2.0, 3.0], [1e3, 1e3, 1e3]]], &device).unwrap();
        let weight = weighting(1.0, 0.0).forward(&distances).unwrap();
        let values: Vec<f32> = weight.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values[3..].iter().all(|&v| v == 0.0));

        let alone = Tensor::new(&[[[1.0f32, 2.0, 3.0]]], &device).unwrap();
        let alone: Vec<f32> = weighting(1.0, 0.0)
            .forward(&alone)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (batched, alone) in values[..3].iter().zip(&alone) {
            assert!((batched - alone).abs() < 1e-7);
        }
    }

    #[test]
    fn test_negative_alpha() {
        let device = Device::Cpu;
        let distances = Tensor::new(&[[[0.0f32, 1.0, 10.0]]], &device).unwrap();
        let weight = weighting(-1.0, 0.0).forward(&distances).unwrap();
        let values: Vec<f32> = weight.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        // Far neighbors now dominate
        assert!(values[2] > values[1] && values[1] > values[0]);
        let total: f32 = values.iter().sum();
        assert!((total - 3.0).abs() < 1e-4);
    }
}
