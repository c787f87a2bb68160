//! Binary classification metrics
//!
//! Threshold metrics (accuracy, precision, recall, F1, confusion matrix) and
//! ranking metrics (ROC curve, precision-recall curve, AUC) computed from
//! ground-truth labels and malignant-class probabilities.
//!
//! Undefined ratios (zero denominators) evaluate to 0.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::loader::Label;

/// 2x2 confusion matrix, rows = actual, columns = predicted:
/// `[[tn, fp], [fn, tp]]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub matrix: [[u64; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[Label], ground_truth: &[Label]) -> Self {
        let mut cm = Self::default();
        for (pred, actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(*actual, *pred);
        }
        cm
    }

    pub fn add(&mut self, actual: Label, predicted: Label) {
        self.matrix[actual.as_index()][predicted.as_index()] += 1;
    }

    pub fn true_negatives(&self) -> u64 {
        self.matrix[0][0]
    }

    pub fn false_positives(&self) -> u64 {
        self.matrix[0][1]
    }

    pub fn false_negatives(&self) -> u64 {
        self.matrix[1][0]
    }

    pub fn true_positives(&self) -> u64 {
        self.matrix[1][1]
    }

    pub fn total(&self) -> u64 {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives() + self.true_negatives(), self.total())
    }

    /// tp / (tp + fp)
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives(), self.true_positives() + self.false_positives())
    }

    /// tp / (tp + fn)
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives(), self.true_positives() + self.false_negatives())
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    /// Nested rows, the layout persisted in the history blob
    pub fn to_rows(&self) -> Vec<Vec<u64>> {
        self.matrix.iter().map(|row| row.to_vec()).collect()
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "              pred 0  pred 1")?;
        writeln!(f, "  actual 0  {:>7} {:>7}", self.matrix[0][0], self.matrix[0][1])?;
        write!(f, "  actual 1  {:>7} {:>7}", self.matrix[1][0], self.matrix[1][1])
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Label every probability strictly above `threshold` as malignant
pub fn threshold_predictions(probabilities: &[f64], threshold: f64) -> Vec<Label> {
    probabilities
        .iter()
        .map(|&p| if p > threshold { Label::Malignant } else { Label::Benign })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing; the first entry is `+inf`
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    pub fn auc(&self) -> f64 {
        auc(&self.fpr, &self.tpr)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecallCurve {
    /// One entry longer than `thresholds`; ends with 1
    pub precision: Vec<f64>,
    /// One entry longer than `thresholds`; ends with 0
    pub recall: Vec<f64>,
    /// Increasing
    pub thresholds: Vec<f64>,
}

/// Cumulative false/true positive counts at each distinct score, scanning
/// scores from highest to lowest. Returns `(fps, tps, thresholds)`.
fn binary_clf_curve(ground_truth: &[Label], scores: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fps = Vec::new();
    let mut tps = Vec::new();
    let mut thresholds = Vec::new();
    let mut positives = 0.0;

    for (rank, &idx) in order.iter().enumerate() {
        if ground_truth[idx] == Label::Malignant {
            positives += 1.0;
        }
        let last_of_run = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_run {
            tps.push(positives);
            fps.push((rank + 1) as f64 - positives);
            thresholds.push(scores[idx]);
        }
    }

    (fps, tps, thresholds)
}

/// ROC curve with collinear intermediate points dropped.
///
/// A leading `(0, 0)` point with threshold `+inf` is always present. When
/// one class is absent its rate is undefined and filled with NaN.
pub fn roc_curve(ground_truth: &[Label], scores: &[f64]) -> RocCurve {
    let (mut fps, mut tps, mut thresholds) = binary_clf_curve(ground_truth, scores);

    if fps.len() > 2 {
        let n = fps.len();
        let keep: Vec<usize> = (0..n)
            .filter(|&i| {
                i == 0 || i == n - 1 || {
                    let second_diff = |v: &[f64]| v[i + 1] - 2.0 * v[i] + v[i - 1];
                    second_diff(&fps) != 0.0 || second_diff(&tps) != 0.0
                }
            })
            .collect();
        fps = keep.iter().map(|&i| fps[i]).collect();
        tps = keep.iter().map(|&i| tps[i]).collect();
        thresholds = keep.iter().map(|&i| thresholds[i]).collect();
    }

    fps.insert(0, 0.0);
    tps.insert(0, 0.0);
    thresholds.insert(0, f64::INFINITY);

    let normalize = |counts: &[f64], what: &str| -> Vec<f64> {
        match counts.last() {
            Some(&total) if total > 0.0 => counts.iter().map(|c| c / total).collect(),
            _ => {
                warn!("No {} samples; the corresponding ROC rate is undefined", what);
                vec![f64::NAN; counts.len()]
            }
        }
    };

    RocCurve {
        fpr: normalize(&fps, "negative"),
        tpr: normalize(&tps, "positive"),
        thresholds,
    }
}

/// Area under a curve by the trapezoidal rule.
///
/// `x` must be monotonic; a decreasing `x` yields a positive area as well.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    if x.len() < 2 || x.len() != y.len() {
        return f64::NAN;
    }

    let area: f64 = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum();

    let decreasing = x.windows(2).all(|w| w[1] <= w[0]) && x[0] != x[x.len() - 1];
    if decreasing {
        -area
    } else {
        area
    }
}

/// ROC AUC, or None when only one class is present
pub fn roc_auc_score(ground_truth: &[Label], scores: &[f64]) -> Option<f64> {
    let positives = ground_truth.iter().filter(|&&l| l == Label::Malignant).count();
    if positives == 0 || positives == ground_truth.len() {
        return None;
    }
    Some(roc_curve(ground_truth, scores).auc())
}

/// Precision-recall pairs for every distinct threshold.
///
/// Thresholds ascend; the final `(precision 1, recall 0)` point has no
/// threshold. Without positives the recall is 1 everywhere.
pub fn precision_recall_curve(ground_truth: &[Label], scores: &[f64]) -> PrecisionRecallCurve {
    let (fps, tps, thresholds) = binary_clf_curve(ground_truth, scores);

    let mut precision: Vec<f64> = tps
        .iter()
        .zip(fps.iter())
        .map(|(tp, fp)| if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 })
        .collect();

    let mut recall: Vec<f64> = match tps.last() {
        Some(&total) if total > 0.0 => tps.iter().map(|tp| tp / total).collect(),
        _ => {
            warn!("No positive samples; recall is set to 1 for all thresholds");
            vec![1.0; tps.len()]
        }
    };

    precision.reverse();
    recall.reverse();
    precision.push(1.0);
    recall.push(0.0);

    PrecisionRecallCurve {
        precision,
        recall,
        thresholds: thresholds.into_iter().rev().collect(),
    }
}

/// Running average for tracking metrics during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Add a value observed `weight` times
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
