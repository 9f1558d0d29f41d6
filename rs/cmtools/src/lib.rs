//! Confusion-matrix statistics.
//!
//! This crate provides functionality to:
//! - Accumulate a square count matrix from ground-truth / predicted labels
//! - Compute overall accuracy and per-class accuracy, false-alarm rate, IoU and F1
//!
//! Rows index the ground-truth class, columns the predicted class. Classes that
//! have no support for a given statistic get the sentinel value `-1` and are
//! left out of the corresponding average (IoU instead substitutes a value, see
//! [`MissingClassPolicy`]).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value reported for classes whose statistic is undefined.
pub const INVALID: f64 = -1.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CmError {
    #[error("confusion matrix must have at least one class")]
    Empty,
    #[error("confusion matrix must be square, row {row} has {len} columns for {num_classes} classes")]
    NotSquare {
        row: usize,
        len: usize,
        num_classes: usize,
    },
    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("got {targets} targets but {predictions} predictions")]
    LengthMismatch { targets: usize, predictions: usize },
    #[error("cannot merge a {other}-class matrix into a {this}-class matrix")]
    ClassCountMismatch { this: usize, other: usize },
}

/// How IoU treats classes absent from the ground truth.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingClassPolicy {
    /// Substitute the mean IoU of the classes that are present.
    #[default]
    MeanOfValid,
    /// Substitute 1. Some papers report this; it inflates the average.
    One,
}

/// Square count matrix, row-major.
///
/// With the `serde` feature the matrix is stored as its list of rows and
/// validated through [`ConfusionMatrix::from_rows`] when read back.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "Vec<Vec<u64>>", into = "Vec<Vec<u64>>")
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Create an all-zero matrix.
    pub fn new(num_classes: usize) -> Result<Self, CmError> {
        if num_classes == 0 {
            return Err(CmError::Empty);
        }
        Ok(Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        })
    }

    /// Build a matrix from its rows (ground-truth classes).
    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self, CmError> {
        let num_classes = rows.len();
        if num_classes == 0 {
            return Err(CmError::Empty);
        }
        let mut counts = Vec::with_capacity(num_classes * num_classes);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != num_classes {
                return Err(CmError::NotSquare {
                    row,
                    len: values.len(),
                    num_classes,
                });
            }
            counts.extend(values);
        }
        Ok(Self {
            num_classes,
            counts,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Count of samples of class `target` predicted as `predicted`.
    pub fn get(&self, target: usize, predicted: usize) -> u64 {
        self.counts[target * self.num_classes + predicted]
    }

    pub fn rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .chunks(self.num_classes)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Record one sample.
    pub fn add(&mut self, target: usize, predicted: usize) -> Result<(), CmError> {
        for label in [target, predicted] {
            if label >= self.num_classes {
                return Err(CmError::LabelOutOfRange {
                    label,
                    num_classes: self.num_classes,
                });
            }
        }
        self.counts[target * self.num_classes + predicted] += 1;
        Ok(())
    }

    /// Record a batch of samples given as parallel label slices.
    ///
    /// The matrix is left untouched if any label is invalid.
    pub fn update(&mut self, targets: &[usize], predictions: &[usize]) -> Result<(), CmError> {
        if targets.len() != predictions.len() {
            return Err(CmError::LengthMismatch {
                targets: targets.len(),
                predictions: predictions.len(),
            });
        }
        if let Some(&label) = targets
            .iter()
            .chain(predictions.iter())
            .find(|&&label| label >= self.num_classes)
        {
            return Err(CmError::LabelOutOfRange {
                label,
                num_classes: self.num_classes,
            });
        }
        for (&t, &p) in targets.iter().zip(predictions) {
            self.counts[t * self.num_classes + p] += 1;
        }
        Ok(())
    }

    /// Add the counts of another matrix of the same size.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<(), CmError> {
        if other.num_classes != self.num_classes {
            return Err(CmError::ClassCountMismatch {
                this: self.num_classes,
                other: other.num_classes,
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    /// Per-class ground-truth support (TP + FN).
    pub fn row_sums(&self) -> Vec<u64> {
        self.counts
            .chunks(self.num_classes)
            .map(|row| row.iter().sum())
            .collect()
    }

    /// Per-class predicted support (TP + FP).
    pub fn col_sums(&self) -> Vec<u64> {
        (0..self.num_classes)
            .map(|j| (0..self.num_classes).map(|i| self.get(i, j)).sum())
            .collect()
    }

    /// True positives per class.
    pub fn diagonal(&self) -> Vec<u64> {
        (0..self.num_classes).map(|i| self.get(i, i)).collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl TryFrom<Vec<Vec<u64>>> for ConfusionMatrix {
    type Error = CmError;

    fn try_from(rows: Vec<Vec<u64>>) -> Result<Self, CmError> {
        Self::from_rows(rows)
    }
}

impl From<ConfusionMatrix> for Vec<Vec<u64>> {
    fn from(cm: ConfusionMatrix) -> Self {
        cm.rows()
    }
}

/// Divide `num` by `den` per class, replacing a zero denominator by 1 and the
/// result by [`INVALID`]. Returns the values and the validity mask.
fn masked_ratio(num: &[f64], den: &[u64]) -> (Vec<f64>, Vec<bool>) {
    let mask: Vec<bool> = den.iter().map(|&d| d > 0).collect();
    let values = num
        .iter()
        .zip(den)
        .zip(&mask)
        .map(|((&n, &d), &valid)| {
            let d = if d == 0 { 1 } else { d };
            if valid {
                n / d as f64
            } else {
                INVALID
            }
        })
        .collect();
    (values, mask)
}

/// Mean of the valid entries, 0 when there are none.
fn masked_mean(values: &[f64], mask: &[bool]) -> f64 {
    let (sum, count) = values
        .iter()
        .zip(mask)
        .filter(|(_, &valid)| valid)
        .fold((0.0, 0usize), |(s, c), (&v, _)| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn as_f64(values: &[u64]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}

/// Fraction of samples on the diagonal. An empty matrix scores 0.
pub fn overall_accuracy(cm: &ConfusionMatrix) -> f64 {
    let total = cm.total();
    let trace: u64 = cm.diagonal().iter().sum();
    trace as f64 / total.max(1) as f64
}

/// Per-class recall (diagonal / row sum) and its average over present classes.
pub fn accuracy_per_class(cm: &ConfusionMatrix) -> (f64, Vec<f64>) {
    let (per_class, mask) = masked_ratio(&as_f64(&cm.diagonal()), &cm.row_sums());
    (masked_mean(&per_class, &mask), per_class)
}

/// Per-class probability of false alarm, (col sum - diagonal) / col sum, i.e.
/// one minus precision. Classes never predicted get [`INVALID`].
pub fn pfa_per_class(cm: &ConfusionMatrix) -> (f64, Vec<f64>) {
    let col_sums = cm.col_sums();
    let false_alarms: Vec<f64> = col_sums
        .iter()
        .zip(cm.diagonal())
        .map(|(&c, d)| (c - d) as f64)
        .collect();
    let (per_class, mask) = masked_ratio(&false_alarms, &col_sums);
    (masked_mean(&per_class, &mask), per_class)
}

/// Per-class intersection over union, TP / (TP + FN + FP).
///
/// Classes without ground-truth samples are filled according to `policy`, and
/// the average runs over every class including the filled ones.
pub fn iou_per_class(cm: &ConfusionMatrix, policy: MissingClassPolicy) -> (f64, Vec<f64>) {
    let tp = cm.diagonal();
    let tp_plus_fn = cm.row_sums();
    let tp_plus_fp = cm.col_sums();

    let mask: Vec<bool> = tp_plus_fn.iter().map(|&s| s == 0).collect();
    let mut iou: Vec<f64> = tp
        .iter()
        .zip(tp_plus_fn.iter().zip(&tp_plus_fp))
        .zip(&mask)
        .map(|((&tp, (&tp_fn, &tp_fp)), &missing)| {
            tp as f64 / (tp_fn + tp_fp - tp + missing as u64) as f64
        })
        .collect();

    let fill = match policy {
        MissingClassPolicy::One => 1.0,
        MissingClassPolicy::MeanOfValid => {
            let valid: Vec<bool> = mask.iter().map(|&m| !m).collect();
            masked_mean(&iou, &valid)
        }
    };
    for (value, &missing) in iou.iter_mut().zip(&mask) {
        if missing {
            *value = fill;
        }
    }

    let average = iou.iter().sum::<f64>() / iou.len() as f64;
    (average, iou)
}

/// Per-class F1 score, 2 * TP / (row sum + col sum).
pub fn f1score_per_class(cm: &ConfusionMatrix) -> (f64, Vec<f64>) {
    let sums: Vec<u64> = cm
        .row_sums()
        .iter()
        .zip(cm.col_sums())
        .map(|(&r, c)| r + c)
        .collect();
    let twice_tp: Vec<f64> = cm.diagonal().iter().map(|&d| 2.0 * d as f64).collect();
    let (per_class, mask) = masked_ratio(&twice_tp, &sums);
    (masked_mean(&per_class, &mask), per_class)
}

/// All statistics of a confusion matrix.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub overall_accuracy: f64,
    pub average_accuracy: f64,
    pub accuracy_per_class: Vec<f64>,
    pub average_pfa: f64,
    pub pfa_per_class: Vec<f64>,
    pub average_iou: f64,
    pub iou_per_class: Vec<f64>,
    pub average_f1: f64,
    pub f1_per_class: Vec<f64>,
}

impl Summary {
    pub fn from_matrix(cm: &ConfusionMatrix, policy: MissingClassPolicy) -> Self {
        let (average_accuracy, accuracy_per_class) = accuracy_per_class(cm);
        let (average_pfa, pfa_per_class) = pfa_per_class(cm);
        let (average_iou, iou_per_class) = iou_per_class(cm, policy);
        let (average_f1, f1_per_class) = f1score_per_class(cm);
        Self {
            overall_accuracy: overall_accuracy(cm),
            average_accuracy,
            accuracy_per_class,
            average_pfa,
            pfa_per_class,
            average_iou,
            iou_per_class,
            average_f1,
            f1_per_class,
        }
    }

    /// Print the summary as a table, one row per class.
    pub fn print_summary(&self) {
        println!();
        println!(" Overall accuracy  = {:.4}", self.overall_accuracy);
        println!(" Average accuracy  = {:.4}", self.average_accuracy);
        println!(" Average PFA       = {:.4}", self.average_pfa);
        println!(" Average IoU       = {:.4}", self.average_iou);
        println!(" Average F1        = {:.4}", self.average_f1);
        println!();
        println!(" class |  accuracy |       pfa |       iou |        f1");
        for class in 0..self.iou_per_class.len() {
            println!(
                " {:>5} | {:>9.4} | {:>9.4} | {:>9.4} | {:>9.4}",
                class,
                self.accuracy_per_class[class],
                self.pfa_per_class[class],
                self.iou_per_class[class],
                self.f1_per_class[class],
            );
        }
    }
}
