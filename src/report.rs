//! Result persistence
//!
//! Merges the epoch history with the test metrics into one map and writes
//! it as `trainHistoryDict.msgpack`, plus a plain-text summary
//! `classification_output_<base>.txt`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::evaluation::evaluator::EvaluationReport;
use crate::training::history::TrainingHistory;
use crate::utils::error::Result;

pub const HISTORY_FILE: &str = "trainHistoryDict.msgpack";

/// One value of the history map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryValue {
    Int(i64),
    Float(f64),
    Series(Vec<f64>),
    Matrix(Vec<Vec<u64>>),
}

impl HistoryValue {
    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            HistoryValue::Series(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HistoryValue::Float(v) => Some(*v),
            HistoryValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

pub type HistoryMap = BTreeMap<String, HistoryValue>;

/// Epoch series plus test metrics.
///
/// `auc` holds the test ROC AUC; the per-epoch training AUC is kept under
/// `train_auc`.
pub fn build_history_map(
    history: &TrainingHistory,
    report: &EvaluationReport,
    num_train_examples: i64,
) -> HistoryMap {
    let mut map = HistoryMap::new();

    for (name, series) in history.series() {
        let key = if name == "auc" { "train_auc" } else { name };
        map.insert(key.to_string(), HistoryValue::Series(series.to_vec()));
    }

    let mut put = |key: &str, value: HistoryValue| {
        map.insert(key.to_string(), value);
    };
    put("num_desired_train_examples", HistoryValue::Int(num_train_examples));
    put("test_accuracy", HistoryValue::Float(report.test_accuracy));
    put("test_loss", HistoryValue::Float(report.test_loss));
    put(
        "test_confusion_matrix",
        HistoryValue::Matrix(report.confusion_matrix.to_rows()),
    );
    put("recall", HistoryValue::Float(report.recall));
    put("f1", HistoryValue::Float(report.f1));
    put("precis", HistoryValue::Float(report.precision));
    put("auc", HistoryValue::Float(report.test_auc));
    put("roc_fpr", HistoryValue::Series(report.roc.fpr.clone()));
    put("roc_tpr", HistoryValue::Series(report.roc.tpr.clone()));
    put("roc_thresholds", HistoryValue::Series(report.roc.thresholds.clone()));
    put("pr_precision", HistoryValue::Series(report.pr.precision.clone()));
    put("pr_recall", HistoryValue::Series(report.pr.recall.clone()));
    put("pr_thresholds", HistoryValue::Series(report.pr.thresholds.clone()));

    map
}

pub fn save_history(path: &Path, map: &HistoryMap) -> Result<()> {
    fs::write(path, rmp_serde::to_vec_named(map)?)?;
    Ok(())
}

/// Read a history blob back for offline analysis
pub fn load_history(path: &Path) -> Result<HistoryMap> {
    let bytes = fs::read(path)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

fn format_list(values: &[f64]) -> String {
    format!("{:?}", values)
}

/// Text summary: six sections, each a header line followed by its value
pub fn render_text_report(history: &TrainingHistory, test_accuracy: f64, num_train_examples: i64) -> String {
    [
        ("validation_acc", format_list(&history.val_accuracy)),
        ("train_acc", format_list(&history.accuracy)),
        ("validation_loss", format_list(&history.val_loss)),
        ("train_loss", format_list(&history.loss)),
        ("test_acc", format!("{:?}", test_accuracy)),
        ("num_desired_train_examples", num_train_examples.to_string()),
    ]
    .iter()
    .map(|(header, value)| format!("{}\n{}", header, value))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Files written by [`persist_results`]
#[derive(Debug, Clone)]
pub struct PersistedResults {
    pub history: PathBuf,
    pub text_report: PathBuf,
}

pub fn persist_results(
    output_dir: &Path,
    base_name: &str,
    history: &TrainingHistory,
    report: &EvaluationReport,
    num_train_examples: i64,
) -> Result<PersistedResults> {
    fs::create_dir_all(output_dir)?;

    let paths = PersistedResults {
        history: output_dir.join(HISTORY_FILE),
        text_report: output_dir.join(format!("classification_output_{}.txt", base_name)),
    };

    save_history(&paths.history, &build_history_map(history, report, num_train_examples))?;
    fs::write(
        &paths.text_report,
        render_text_report(history, report.test_accuracy, num_train_examples),
    )?;

    info!("Saved history to {:?}", paths.history);
    info!("Saved report to {:?}", paths.text_report);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::Label;
    use crate::evaluation::evaluator::InferencePass;
    use crate::training::history::EpochRecord;

    fn fixture() -> (TrainingHistory, EvaluationReport) {
        let mut history = TrainingHistory::new();
        for epoch in 0..2 {
            history.push(&EpochRecord {
                epoch,
                loss: [0.7, 0.6][epoch],
                accuracy: 0.5,
                auc: 0.6,
                val_loss: 0.8,
                val_accuracy: 0.25,
                val_auc: 0.5,
                lr: 1e-3,
            });
        }
        let pass = InferencePass {
            loss: 0.5,
            probabilities: vec![0.1, 0.4, 0.35, 0.8],
            labels: vec![Label::Benign, Label::Benign, Label::Malignant, Label::Malignant],
        };
        (history, EvaluationReport::from_pass(&pass, 0.5))
    }

    #[test]
    fn test_history_keys() {
        let (history, report) = fixture();
        let map = build_history_map(&history, &report, 20);

        for key in [
            "loss", "accuracy", "val_loss", "val_accuracy", "val_auc", "lr", "train_auc",
            "num_desired_train_examples", "test_accuracy", "test_loss", "test_confusion_matrix",
            "recall", "f1", "precis", "auc", "roc_fpr", "roc_tpr", "roc_thresholds",
            "pr_precision", "pr_recall", "pr_thresholds",
        ] {
            assert!(map.contains_key(key), "missing {}", key);
        }
        assert_eq!(map["auc"], HistoryValue::Float(0.75));
        assert_eq!(map["train_auc"].as_series(), Some(&[0.6, 0.6][..]));
        assert_eq!(map["test_confusion_matrix"], HistoryValue::Matrix(vec![vec![2, 0], vec![1, 1]]));
    }

    #[test]
    fn test_blob_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (history, report) = fixture();
        let paths = persist_results(dir.path(), "compact_cnn20", &history, &report, 20).unwrap();

        let loaded = load_history(&paths.history).unwrap();
        assert_eq!(loaded["num_desired_train_examples"], HistoryValue::Int(20));
        assert_eq!(loaded["loss"], HistoryValue::Series(history.loss.clone()));
        assert_eq!(loaded["test_confusion_matrix"], HistoryValue::Matrix(vec![vec![2, 0], vec![1, 1]]));

        let thresholds = loaded["roc_thresholds"].as_series().unwrap();
        assert!(thresholds[0].is_infinite());
        assert_eq!(thresholds.len(), report.roc.thresholds.len());
    }

    #[test]
    fn test_text_report_sections() {
        let (history, report) = fixture();
        let text = render_text_report(&history, report.test_accuracy, 20);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "validation_acc",
                "[0.25, 0.25]",
                "train_acc",
                "[0.5, 0.5]",
                "validation_loss",
                "[0.8, 0.8]",
                "train_loss",
                "[0.7, 0.6]",
                "test_acc",
                "0.75",
                "num_desired_train_examples",
                "20",
            ]
        );
    }
}
