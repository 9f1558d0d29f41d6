//! Geometry encoder
//!
//! Maps normalized relative coordinates [B, D, N, K] to a kernel-sized
//! embedding [B, M, N, K]: pointwise conv (no bias) -> InstanceNorm -> ReLU.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, VarBuilder};

use crate::config::INSTANCE_NORM_EPS;
use crate::model::instance_norm::InstanceNorm;

#[derive(Debug, Clone)]
pub struct GeometryEncoder {
    fc: Conv2d,
    norm: InstanceNorm,
}

impl GeometryEncoder {
    /// Weight paths: fc1.weight, bn1.weight/bias
    pub fn load(vb: VarBuilder, dim: usize, kernel_size: usize) -> Result<Self> {
        let fc = candle_nn::conv2d_no_bias(dim, kernel_size, 1, Default::default(), vb.pp("fc1"))?;
        let norm = InstanceNorm::load(vb.pp("bn1"), kernel_size, INSTANCE_NORM_EPS)?;
        Ok(Self { fc, norm })
    }
}

impl Module for GeometryEncoder {
    fn forward(&self, pts: &Tensor) -> Result<Tensor> {
        let x = pts.contiguous()?;
        let x = self.fc.forward(&x)?;
        self.norm.forward(&x)?.relu()
    }
}
