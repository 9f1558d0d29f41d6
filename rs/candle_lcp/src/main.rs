//! LightConvPoint tools with Candle
//!
//! This binary benchmarks the convolution layer and summarizes segmentation
//! confusion matrices.

mod cmd_bench;
mod cmd_stats;

use candle_core::{Device, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd_bench::BenchArgs;
use crate::cmd_stats::StatsArgs;

/// Select the compute device
pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if candle_core::utils::metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            println!(
                "Running on CPU, to run on GPU(metal), build this example with `--features metal`"
            );
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            println!("Running on CPU, to run on GPU, build this example with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time the convolution forward pass on a synthetic point cloud.
    Bench(BenchArgs),
    /// Summarize a confusion matrix stored as JSON.
    Stats(StatsArgs),
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run on CPU rather than on GPU.
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Bench(args) => {
            let device = device(cli.cpu)?;
            println!("Using device: {:?}", device);
            cmd_bench::run(args, &device)
        }
        Command::Stats(args) => cmd_stats::run(args),
    }
}
