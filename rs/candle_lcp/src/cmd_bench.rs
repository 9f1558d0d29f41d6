//! Bench subcommand: time the LightConvPoint forward pass.

use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device, Result, Tensor};
use candle_lcp::debug::TensorStats;
use candle_lcp::{Lcp, LcpConfig, NormRadius};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use serde::Serialize;

/// Arguments for the bench subcommand
#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Batch size (B).
    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    /// Number of support points per sample (N).
    #[arg(long, default_value_t = 1024)]
    pub support_points: usize,

    /// Number of neighbors per support point (K).
    #[arg(long, default_value_t = 16)]
    pub neighbors: usize,

    /// Input feature channels.
    #[arg(long, default_value_t = 64)]
    pub in_channels: usize,

    /// Output feature channels.
    #[arg(long, default_value_t = 64)]
    pub out_channels: usize,

    /// Number of dynamic kernel elements (M).
    #[arg(long, default_value_t = 16)]
    pub kernel_size: usize,

    /// Dimension of the point coordinates.
    #[arg(long, default_value_t = 3)]
    pub dim: usize,

    /// Disable the output bias.
    #[arg(long)]
    pub no_bias: bool,

    /// Update the normalization radius on every call.
    #[arg(long)]
    pub train: bool,

    /// Layer weights in safetensors format; random initialization when absent.
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Number of timed runs.
    #[arg(long, default_value_t = 100)]
    pub runs: usize,

    /// Number of untimed warmup runs.
    #[arg(long, default_value_t = 10)]
    pub warmup: usize,

    /// Write a JSON report to this path.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    batch_size: usize,
    support_points: usize,
    neighbors: usize,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    dim: usize,
    bias: bool,
    train: bool,
    weights: Option<PathBuf>,
    runs: usize,
    avg_ms: f64,
    norm_radius: f64,
    output: TensorStats,
}

/// Deterministic point cloud with structured features.
///
/// Returns (features [B, Cin, N, K], points [B, D, N, K], support points [B, D, N]).
fn synthetic_cloud(args: &BenchArgs, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
    let (b, c, n, k, d) = (
        args.batch_size,
        args.in_channels,
        args.support_points,
        args.neighbors,
        args.dim,
    );

    let mut features = vec![0.0f32; b * c * n * k];
    for bi in 0..b {
        for ci in 0..c {
            for i in 0..n * k {
                features[(bi * c + ci) * n * k + i] =
                    (bi + 1) as f32 * 0.1 + (ci + 1) as f32 * 0.01 + i as f32 * 0.001;
            }
        }
    }

    // Support points on a slowly winding curve, neighbors on shells of growing radius
    let mut support = vec![0.0f32; b * d * n];
    let mut points = vec![0.0f32; b * d * n * k];
    for bi in 0..b {
        for di in 0..d {
            for ni in 0..n {
                let s = ((ni as f32) * 0.05 + di as f32 + bi as f32 * 0.3).sin() * 10.0;
                support[(bi * d + di) * n + ni] = s;
                for ki in 0..k {
                    let phase = (ni * 7 + ki * 13 + di * 31) as f32;
                    let offset = (ki + 1) as f32 * 0.05 * phase.sin();
                    points[((bi * d + di) * n + ni) * k + ki] = s + offset;
                }
            }
        }
    }

    let features = Tensor::from_vec(features, (b, c, n, k), device)?;
    let points = Tensor::from_vec(points, (b, d, n, k), device)?;
    let support = Tensor::from_vec(support, (b, d, n), device)?;
    Ok((features, points, support))
}

/// Run the bench subcommand
pub fn run(args: &BenchArgs, device: &Device) -> anyhow::Result<()> {
    let config = LcpConfig::new(args.in_channels, args.out_channels, args.kernel_size)
        .with_bias(!args.no_bias)
        .with_dim(args.dim);
    config.validate()?;

    // Keep the VarMap alive for randomly initialized layers
    let varmap = VarMap::new();
    let (layer, mut radius) = match &args.weights {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Layer weights not found at {:?}", path);
            }
            println!("Loading layer weights from: {:?}", path);
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
            let radius = NormRadius::load(&vb)?;
            (Lcp::load(vb, &config)?, radius)
        }
        None => {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
            (Lcp::load(vb, &config)?, NormRadius::default())
        }
    };
    println!("Layer config: {:?}", config);
    println!("Initial norm radius: {:.6}", radius.value());

    let (features, points, support) = synthetic_cloud(args, device)?;
    println!(
        "Input shapes: features {:?}, points {:?}, support {:?}",
        features.dims(),
        points.dims(),
        support.dims()
    );

    // Warm up
    for _ in 0..args.warmup {
        let _ = layer.forward(&features, &points, &support, radius, args.train)?;
    }
    device.synchronize()?;

    let runs = args.runs.max(1);
    let start_time = Instant::now();
    let mut output = None;
    for _ in 0..runs {
        let out = layer.forward(&features, &points, &support, radius, args.train)?;
        radius = out.norm_radius;
        output = Some(out.features);
    }
    device.synchronize()?;

    let duration = start_time.elapsed();
    let avg_ms = duration.as_secs_f64() * 1000.0 / runs as f64;

    let Some(output) = output else {
        anyhow::bail!("no forward pass was run");
    };
    let stats = TensorStats::from_tensor(&output)?;

    println!("Output: {}", stats);
    println!("Norm radius after runs: {:.6}", radius.value());
    println!("Average forward time over {} runs: {:.3} ms", runs, avg_ms);
    if stats.non_finite > 0 {
        tracing::warn!(count = stats.non_finite, "output contains non-finite values");
    }

    if let Some(path) = &args.output {
        let report = BenchReport {
            batch_size: args.batch_size,
            support_points: args.support_points,
            neighbors: args.neighbors,
            in_channels: args.in_channels,
            out_channels: args.out_channels,
            kernel_size: args.kernel_size,
            dim: args.dim,
            bias: !args.no_bias,
            train: args.train,
            weights: args.weights.clone(),
            runs,
            avg_ms,
            norm_radius: radius.value(),
            output: stats,
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &report)?;
        println!("Report saved to: {:?}", path);
    }

    Ok(())
}
