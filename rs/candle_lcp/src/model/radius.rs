//! Adaptive normalization radius
//!
//! Neighbor coordinates are divided by a running estimate of the neighborhood
//! scale before they reach the geometry encoder. The estimate is an exponential
//! moving average of the mean (over support points) of the largest neighbor
//! distance, updated in training mode only.
//!
//! The radius is a plain value: [`NormRadius::observe`] computes the next value
//! without touching any layer state, and the caller decides when to commit it.
//! A layer shared between threads therefore never races on it.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::NORM_RADIUS_MOMENTUM;

/// Name of the radius tensor in saved weights
pub const NORM_RADIUS_NAME: &str = "norm_radius";

/// Running neighborhood scale, always finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormRadius(f64);

impl Default for NormRadius {
    fn default() -> Self {
        Self(1.0)
    }
}

impl NormRadius {
    pub fn new(value: f64) -> Result<Self> {
        if !(value.is_finite() && value > 0.0) {
            candle_core::bail!("normalization radius must be finite and positive, got {value}");
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// EMA step towards `mean_max_distance`.
    ///
    /// A convex combination of the current (positive) value and a non-negative
    /// sample, so the result stays positive.
    pub fn updated(&self, mean_max_distance: f64) -> Self {
        let sample = mean_max_distance.max(0.0);
        Self(self.0 * (1.0 - NORM_RADIUS_MOMENTUM) + sample * NORM_RADIUS_MOMENTUM)
    }

    /// Next radius given a batch of neighbor distances of shape [B, N, K]
    pub fn observe(&self, distances: &Tensor) -> Result<Self> {
        let mean_max_distance = distances
            .max(2)?
            .mean_all()?
            .to_dtype(DType::F64)?
            .to_scalar::<f64>()?;
        let next = self.updated(mean_max_distance);
        tracing::trace!(
            previous = self.0,
            mean_max_distance,
            next = next.0,
            "norm radius update"
        );
        Ok(next)
    }

    /// Read `norm_radius` from saved weights, defaulting to 1 when absent.
    ///
    /// The radius is never registered as a variable, so optimizers built over a
    /// `VarMap` do not see it.
    pub fn load(vb: &VarBuilder) -> Result<Self> {
        if !vb.contains_tensor(NORM_RADIUS_NAME) {
            return Ok(Self::default());
        }
        let value = vb
            .get(1, NORM_RADIUS_NAME)?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?[0];
        Self::new(value)
    }

    /// Tensor of shape [1] for inclusion in saved weights
    pub fn to_tensor(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        Tensor::new(&[self.0], device)?.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn test_rejects_non_positive() {
        assert!(NormRadius::new(0.0).is_err());
        assert!(NormRadius::new(-1.0).is_err());
        assert!(NormRadius::new(f64::NAN).is_err());
        assert!(NormRadius::new(f64::INFINITY).is_err());
        assert_eq!(NormRadius::new(2.5).unwrap().value(), 2.5);
        assert_eq!(NormRadius::default().value(), 1.0);
    }

    #[test]
    fn test_ema_law() {
        let radius = NormRadius::new(2.0).unwrap();
        let next = radius.updated(0.5);
        assert!((next.value() - (2.0 * 0.9 + 0.5 * 0.1)).abs() < 1e-12);

        // Stays positive even when every sample is zero
        let mut radius = NormRadius::default();
        for _ in 0..1000 {
            radius = radius.updated(0.0);
        }
        assert!(radius.value() > 0.0);
    }

    #[test]
    fn test_observe_uses_mean_of_max() {
        let device = Device::Cpu;
        // Two neighborhoods with max distances 2 and 3
        let distances =
            Tensor::from_vec(vec![1.0f32, 2.0, 0.5, 3.0, 1.0, 0.0], (1, 2, 3), &device).unwrap();
        let next = NormRadius::default().observe(&distances).unwrap();
        assert!((next.value() - (0.9 + 2.5 * 0.1)).abs() < 1e-6);
    }

    #[test]
    fn test_load_and_export() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        // Missing from a fresh VarMap: default and not registered as a variable
        assert_eq!(NormRadius::load(&vb).unwrap(), NormRadius::default());
        assert!(varmap.all_vars().is_empty());

        let radius = NormRadius::new(0.25).unwrap();
        let tensor = radius.to_tensor(DType::F32, &device).unwrap();
        assert_eq!(tensor.dims(), &[1]);

        let mut weights = std::collections::HashMap::new();
        weights.insert(NORM_RADIUS_NAME.to_string(), tensor);
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let loaded = NormRadius::load(&vb).unwrap();
        assert!((loaded.value() - 0.25).abs() < 1e-7);
    }
}
