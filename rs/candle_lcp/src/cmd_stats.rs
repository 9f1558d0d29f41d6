//! Stats subcommand: segmentation metrics of a stored confusion matrix.

use std::path::{Path, PathBuf};

use clap::Args;
use cmtools::{ConfusionMatrix, MissingClassPolicy, Summary};

/// Arguments for the stats subcommand
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// JSON file holding the confusion matrix as an array of rows (targets x predictions).
    pub input: PathBuf,

    /// Write the summary as JSON to this path.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Score IoU 1 for classes absent from the ground truth.
    #[arg(long)]
    pub replace_missing_by_one: bool,
}

fn load_matrix(path: &Path) -> anyhow::Result<ConfusionMatrix> {
    if !path.exists() {
        anyhow::bail!("Confusion matrix not found: {:?}", path);
    }
    let file = std::fs::File::open(path)?;
    let rows: Vec<Vec<u64>> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(ConfusionMatrix::from_rows(rows)?)
}

/// Run the stats subcommand
pub fn run(args: &StatsArgs) -> anyhow::Result<()> {
    let policy = if args.replace_missing_by_one {
        MissingClassPolicy::One
    } else {
        MissingClassPolicy::MeanOfValid
    };

    println!("============================================================");
    println!("Confusion matrix statistics");
    println!("============================================================");
    println!("Input: {:?}", args.input);
    println!("Missing class policy: {:?}", policy);

    let cm = load_matrix(&args.input)?;
    println!("Classes: {}, samples: {}", cm.num_classes(), cm.total());
    tracing::debug!(num_classes = cm.num_classes(), "loaded confusion matrix");

    let summary = Summary::from_matrix(&cm, policy);
    summary.print_summary();

    if let Some(path) = &args.output {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &summary)?;
        println!("\nSummary saved to: {:?}", path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("candle_lcp_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_stats_roundtrip_through_files() {
        let input = temp_path("cm.json");
        let output = temp_path("summary.json");
        std::fs::write(&input, "[[4, 1, 1], [0, 2, 0], [0, 0, 0]]").unwrap();

        let args = StatsArgs {
            input: input.clone(),
            output: Some(output.clone()),
            replace_missing_by_one: true,
        };
        run(&args).unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        let summary: Summary = serde_json::from_str(&text).unwrap();
        assert!((summary.overall_accuracy - 6.0 / 8.0).abs() < 1e-9);
        // Class 2 is predicted but never in the ground truth, so it scores 1
        // under this policy
        assert!((summary.iou_per_class[2] - 1.0).abs() < 1e-9);

        std::fs::remove_file(input).ok();
        std::fs::remove_file(output).ok();
    }

    #[test]
    fn test_stats_rejects_ragged_matrix() {
        let input = temp_path("ragged.json");
        std::fs::write(&input, "[[1, 0], [0]]").unwrap();
        let args = StatsArgs {
            input: input.clone(),
            output: None,
            replace_missing_by_one: false,
        };
        assert!(run(&args).is_err());
        std::fs::remove_file(input).ok();
    }
}
