use candle_core::{DType, Result, Tensor};

/// Tensor statistics for inspecting layer outputs
#[derive(Debug, serde::Serialize)]
pub struct TensorStats {
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
    /// Number of NaN or infinite entries
    pub non_finite: usize,
}

impl TensorStats {
    /// Compute statistics over the finite entries of a tensor
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let data: Vec<f32> = tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;

        let finite: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
        let non_finite = data.len() - finite.len();

        let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let count = finite.len().max(1) as f32;
        let mean = finite.iter().sum::<f32>() / count;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / count;

        Ok(Self {
            shape,
            min,
            max,
            mean,
            std: var.sqrt(),
            non_finite,
        })
    }
}

impl std::fmt::Display for TensorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shape={:?} min={:.6} max={:.6} mean={:.6} std={:.6} non_finite={}",
            self.shape, self.min, self.max, self.mean, self.std, self.non_finite
        )
    }
}
