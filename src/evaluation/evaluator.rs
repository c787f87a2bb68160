//! Test-set evaluation
//!
//! Reloads the best checkpoint, runs one deterministic in-order pass over the
//! test split and derives every reported metric from the probabilities.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    tensor::{activation::sigmoid, backend::Backend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::metrics::{
    precision_recall_curve, roc_curve, threshold_predictions, ConfusionMatrix, PrecisionRecallCurve,
    RocCurve, RunningAverage,
};
use crate::dataset::burn_dataset::{LesionBatcher, LesionDataset};
use crate::dataset::loader::Label;
use crate::model::classifier::LesionClassifier;
use crate::training::checkpoint::load_classifier;
use crate::training::history::TrainingHistory;
use crate::training::trainer::{bce_with_logits, to_f64_vec};
use crate::utils::charts::{
    render_confusion_matrix, render_metric_curves, DataSeries, COLOR_TRAIN_ACC, COLOR_TRAIN_LOSS,
    COLOR_VAL_ACC, COLOR_VAL_LOSS,
};
use crate::utils::error::{Result, ResultExt};

/// Raw output of an inference pass
#[derive(Debug, Clone, Default)]
pub struct InferencePass {
    /// Sample-weighted mean binary cross-entropy
    pub loss: f64,
    /// Malignant probability per sample, in dataset order
    pub probabilities: Vec<f64>,
    pub labels: Vec<Label>,
}

/// In-order pass over every sample, including a trailing partial batch
pub fn evaluate_pass<B: Backend>(
    model: &LesionClassifier<B>,
    dataset: &LesionDataset,
    batcher: &LesionBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<InferencePass> {
    let len = dataset.len();
    let mut loss = RunningAverage::new();
    let mut probabilities = Vec::with_capacity(len);
    let mut labels = Vec::with_capacity(len);

    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let items = (start..end)
            .map(|i| dataset.get(i).with_context(|| format!("Sample {} unavailable", i)))
            .collect::<Result<Vec<_>>>()?;
        labels.extend(items.iter().map(|item| item.label));

        let batch = batcher.batch(items, device);
        let logits = model.forward(batch.images).flatten::<1>(0, 1);

        let batch_loss: f64 = bce_with_logits(logits.clone(), batch.targets).into_scalar().elem();
        loss.add_weighted(batch_loss, end - start);
        probabilities.extend(to_f64_vec(sigmoid(logits))?);
    }

    Ok(InferencePass {
        loss: loss.average(),
        probabilities,
        labels,
    })
}

/// Every test metric that ends up in the history blob and report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub test_loss: f64,
    pub test_accuracy: f64,
    /// Trapezoidal area under `roc`
    pub test_auc: f64,
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub roc: RocCurve,
    pub pr: PrecisionRecallCurve,
    pub probabilities: Vec<f64>,
}

impl EvaluationReport {
    /// Derive all metrics from one pass, thresholding with `p > threshold`
    pub fn from_pass(pass: &InferencePass, threshold: f64) -> Self {
        let predictions = threshold_predictions(&pass.probabilities, threshold);
        let confusion_matrix = ConfusionMatrix::from_predictions(&predictions, &pass.labels);
        let roc = roc_curve(&pass.labels, &pass.probabilities);
        let pr = precision_recall_curve(&pass.labels, &pass.probabilities);

        Self {
            test_loss: pass.loss,
            test_accuracy: confusion_matrix.accuracy(),
            test_auc: roc.auc(),
            recall: confusion_matrix.recall(),
            precision: confusion_matrix.precision(),
            f1: confusion_matrix.f1(),
            confusion_matrix,
            roc,
            pr,
            probabilities: pass.probabilities.clone(),
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Test loss: {:.4} | accuracy: {:.4} | AUC: {:.4}",
            self.test_loss, self.test_accuracy, self.test_auc
        );
        info!(
            "Recall: {:.4} | precision: {:.4} | F1: {:.4}",
            self.recall, self.precision, self.f1
        );
        info!("Confusion matrix:\n{}", self.confusion_matrix);
    }
}

/// Reload the checkpoint in `checkpoint_dir` and evaluate it on `test`
pub fn evaluate_checkpoint<B: Backend>(
    checkpoint_dir: &Path,
    test: &LesionDataset,
    batch_size: usize,
    threshold: f64,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let (model, config, _) = load_classifier::<B>(checkpoint_dir, device)?;
    let batcher = LesionBatcher::new(config.image_height, config.image_width);

    let pass = evaluate_pass(&model, test, &batcher, batch_size, device)?;
    Ok(EvaluationReport::from_pass(&pass, threshold))
}

/// Paths of the rendered plots (PNG; an SVG twin sits next to each)
#[derive(Debug, Clone)]
pub struct PlotPaths {
    pub metrics: PathBuf,
    pub confusion_matrix: PathBuf,
}

/// Loss/accuracy curves and the confusion-matrix heatmap
pub fn render_plots(
    history: &TrainingHistory,
    report: &EvaluationReport,
    output_dir: &Path,
    base_name: &str,
) -> Result<PlotPaths> {
    let paths = PlotPaths {
        metrics: output_dir.join(format!("metrics_{}.png", base_name)),
        confusion_matrix: output_dir.join(format!("cm_{}.png", base_name)),
    };

    let series = [
        DataSeries::new("Training Loss", &history.loss, COLOR_TRAIN_LOSS),
        DataSeries::new("Validation Loss", &history.val_loss, COLOR_VAL_LOSS),
        DataSeries::new("Training Accuracy", &history.accuracy, COLOR_TRAIN_ACC),
        DataSeries::new("Validation Accuracy", &history.val_accuracy, COLOR_VAL_ACC),
    ];
    render_metric_curves(&format!("Metrics - {}", base_name), &series, &paths.metrics)?;
    render_confusion_matrix(
        &format!("Confusion matrix - {}", base_name),
        &report.confusion_matrix.matrix,
        &paths.confusion_matrix,
    )?;

    info!("Saved plots to {:?} and {:?}", paths.metrics, paths.confusion_matrix);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classifier::ClassifierConfig;
    use crate::model::BackboneKind;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use Label::{Benign as B, Malignant as M};

    #[test]
    fn test_report_from_pass() {
        let pass = InferencePass {
            loss: 0.4,
            probabilities: vec![0.1, 0.4, 0.35, 0.8],
            labels: vec![B, B, M, M],
        };
        let report = EvaluationReport::from_pass(&pass, 0.5);

        assert_eq!(report.confusion_matrix.matrix, [[2, 0], [1, 1]]);
        assert!((report.test_accuracy - 0.75).abs() < 1e-12);
        assert!((report.recall - 0.5).abs() < 1e-12);
        assert!((report.precision - 1.0).abs() < 1e-12);
        assert!((report.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.test_auc - 0.75).abs() < 1e-12);
        assert_eq!(report.pr.thresholds, vec![0.1, 0.35, 0.4, 0.8]);
    }

    #[test]
    fn test_pass_covers_partial_batch_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<_> = (0..5)
            .map(|i| {
                let path = dir.path().join(format!("{}.png", i));
                RgbImage::from_pixel(4, 4, Rgb([i as u8 * 40, 0, 0])).save(&path).unwrap();
                (path, if i % 2 == 0 { B } else { M })
            })
            .collect();
        let dataset = LesionDataset::new_cached(samples, 32, 32).unwrap();

        let device = Default::default();
        let config = ClassifierConfig::for_backbone(BackboneKind::CompactCnn, 32, 32);
        let model = config.init::<NdArray>(&device);
        let batcher = LesionBatcher::new(32, 32);

        let pass = evaluate_pass(&model, &dataset, &batcher, 2, &device).unwrap();
        assert_eq!(pass.probabilities.len(), 5);
        assert_eq!(pass.labels, vec![B, M, B, M, B]);
        assert!(pass.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(pass.loss.is_finite());

        // Deterministic: a second pass gives identical probabilities.
        let again = evaluate_pass(&model, &dataset, &batcher, 3, &device).unwrap();
        for (a, b) in pass.probabilities.iter().zip(again.probabilities.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_plots_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = TrainingHistory::new();
        history.loss = vec![0.7, 0.6];
        history.val_loss = vec![0.72, 0.65];
        history.accuracy = vec![0.5, 0.6];
        history.val_accuracy = vec![0.5, 0.55];

        let pass = InferencePass {
            loss: 0.6,
            probabilities: vec![0.2, 0.8],
            labels: vec![B, M],
        };
        let report = EvaluationReport::from_pass(&pass, 0.5);
        let paths = render_plots(&history, &report, dir.path(), "compact_cnn20").unwrap();

        assert!(paths.metrics.ends_with("metrics_compact_cnn20.png"));
        assert!(paths.metrics.exists());
        assert!(paths.confusion_matrix.exists());
        assert!(dir.path().join("cm_compact_cnn20.svg").exists());
    }
}
