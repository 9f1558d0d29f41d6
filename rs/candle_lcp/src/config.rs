//! LightConvPoint layer configuration
//!
//! This module defines the construction parameters of the convolution layer and
//! the numeric constants shared by its stages.

use candle_core::Result;

/// Momentum of the running normalization radius update
pub const NORM_RADIUS_MOMENTUM: f64 = 0.1;

/// Variance epsilon of the per-neighborhood instance normalization
pub const INSTANCE_NORM_EPS: f64 = 1e-5;

/// Added to every neighborhood's total distance weight before dividing
pub const DISTANCE_WEIGHT_EPS: f64 = 1e-6;

/// Configuration for a LightConvPoint layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcpConfig {
    /// Number of input feature channels (Cin)
    pub in_channels: usize,
    /// Number of output feature channels (Cout)
    pub out_channels: usize,
    /// Number of dynamic kernel elements (M)
    pub kernel_size: usize,
    /// Whether the output projection adds a per-channel bias
    pub bias: bool,
    /// Dimension of the geometric space (D)
    pub dim: usize,
}

impl LcpConfig {
    /// Create a configuration with bias enabled in 3D space
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            bias: true,
            dim: 3,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    /// Reject zero-sized channel, kernel or space dimensions
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
            ("kernel_size", self.kernel_size),
            ("dim", self.dim),
        ] {
            if value == 0 {
                candle_core::bail!("LcpConfig.{name} must be positive, got 0");
            }
        }
        Ok(())
    }
}
