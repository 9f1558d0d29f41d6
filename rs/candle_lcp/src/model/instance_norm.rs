//! Per-neighborhood instance normalization
//!
//! Normalizes each channel of a [B, C, N, K] tensor with the mean and (biased)
//! variance of its own neighborhood, i.e. over the K axis only, then applies a
//! learned per-channel scale and shift. No running statistics are kept, so the
//! layer behaves identically in training and evaluation.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

#[derive(Debug, Clone)]
pub struct InstanceNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl InstanceNorm {
    pub fn load(vb: VarBuilder, num_channels: usize, eps: f64) -> Result<Self> {
        let weight = vb.get_with_hints(num_channels, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(num_channels, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }

    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }
}

impl Module for InstanceNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let channels = x.dim(1)?;

        let mean = x.mean_keepdim(3)?;
        let x_centered = x.broadcast_sub(&mean)?;
        let var = x_centered.sqr()?.mean_keepdim(3)?;
        let x_normed = x_centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;

        // [C] -> [1, C, 1, 1]
        let weight = self.weight.reshape((1, channels, 1, 1))?;
        let bias = self.bias.reshape((1, channels, 1, 1))?;
        x_normed.broadcast_mul(&weight)?.broadcast_add(&bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn unit_norm(channels: usize, device: &Device) -> InstanceNorm {
        InstanceNorm::new(
            Tensor::ones(channels, DType::F32, device).unwrap(),
            Tensor::zeros(channels, DType::F32, device).unwrap(),
            1e-5,
        )
    }

    #[test]
    fn test_statistics_per_neighborhood() {
        let device = Device::Cpu;
        // Neighborhoods on very different scales normalize to the same values
        let x = Tensor::new(
            &[[[[1.0f32, 2.0, 3.0, 4.0], [100.0, 200.0, 300.0, 400.0]]]],
            &device,
        )
        .unwrap();
        let y = unit_norm(1, &device).forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 4]);

        let rows: Vec<Vec<f32>> = y.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        for row in &rows {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3, "variance {var}");
        }
        for (a, b) in rows[0].iter().zip(&rows[1]) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_affine() {
        let device = Device::Cpu;
        let norm = InstanceNorm::new(
            Tensor::new(&[2.0f32, 0.0], &device).unwrap(),
            Tensor::new(&[0.5f32, -1.0], &device).unwrap(),
            1e-5,
        );
        let x = Tensor::randn(0.0f32, 1.0, (2, 2, 3, 5), &device).unwrap();
        let y = norm.forward(&x).unwrap();

        // Zero scale leaves only the shift
        let shifted: Vec<f32> = y.narrow(1, 1, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(shifted.iter().all(|&v| (v + 1.0).abs() < 1e-6));

        // Scaled channel has mean equal to the shift
        let mean: f32 = y
            .narrow(1, 0, 1)
            .unwrap()
            .mean_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((mean - 0.5).abs() < 1e-4);
    }
}
