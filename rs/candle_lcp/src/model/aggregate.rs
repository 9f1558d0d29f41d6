//! Feature aggregation and output projection
//!
//! The generated kernel weights [B, M, N, K] are contracted with the input
//! features [B, Cin, N, K] over the neighbor axis, giving one Cin-vector per
//! kernel element and support point. A `(1, M)` convolution then mixes the
//! Cin x M products into Cout channels without mixing support points.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Init, VarBuilder};

/// Contract features with kernel weights over K.
///
/// # Arguments
/// * `input` - [B, Cin, N, K]
/// * `mat` - [B, M, N, K]
///
/// # Returns
/// [B, Cin, N, M] with `out[b, c, n, m] = sum_k input[b, c, n, k] * mat[b, m, n, k]`
pub fn aggregate_features(input: &Tensor, mat: &Tensor) -> Result<Tensor> {
    // [B, Cin, N, K] -> [B, N, Cin, K]
    let input = input.transpose(1, 2)?.contiguous()?;
    // [B, M, N, K] -> [B, N, K, M]
    let mat = mat.permute((0, 2, 3, 1))?.contiguous()?;
    // [B, N, Cin, M] -> [B, Cin, N, M]
    input.matmul(&mat)?.transpose(1, 2)?.contiguous()
}

/// Linear map from the flattened (Cin x M) axis to Cout, per support point.
#[derive(Debug, Clone)]
pub struct ChannelProjector {
    conv: Conv2d,
}

impl ChannelProjector {
    /// Weight paths: cv.weight [Cout, Cin, 1, M], cv.bias [Cout]
    ///
    /// Initialization matches `candle_nn::conv2d`, which only handles square
    /// kernels.
    pub fn load(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bias: bool,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, 1, kernel_size),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = if bias {
            let bound = 1. / ((in_channels * kernel_size) as f64).sqrt();
            let init = Init::Uniform {
                lo: -bound,
                up: bound,
            };
            Some(vb.get_with_hints(out_channels, "bias", init)?)
        } else {
            None
        };
        let conv = Conv2d::new(weight, bias, Conv2dConfig::default());
        Ok(Self { conv })
    }
}

impl Module for ChannelProjector {
    /// [B, Cin, N, M] -> [B, Cout, N]
    fn forward(&self, features: &Tensor) -> Result<Tensor> {
        self.conv.forward(features)?.squeeze(3)
    }
}
