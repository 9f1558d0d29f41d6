//! LightConvPoint convolution on candle
//!
//! A point-cloud convolution whose kernel weights are generated per neighbor
//! from local geometry. See [`model::Lcp`] for the layer and
//! [`model::radius::NormRadius`] for the running scale it threads through calls.

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

pub mod config;
pub mod debug;
pub mod model;

pub use config::LcpConfig;
pub use model::radius::NormRadius;
pub use model::{Lcp, LcpOutput};
