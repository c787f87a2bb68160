//! Training controller
//!
//! Runs the epoch loop over a [`LesionClassifier`] using Burn's autodiff
//! directly:
//! - mini-batch Adam updates with binary cross-entropy on logits
//! - a full validation pass per epoch
//! - save-best checkpointing and early stopping on `val_auc`
//! - learning-rate policy and histogram events

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{activation::sigmoid, backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use super::checkpoint::{save_checkpoint, CheckpointKind, CheckpointMetadata, CheckpointPolicy};
use super::early_stopping::EarlyStopping;
use super::histograms::HistogramWriter;
use super::history::{EpochRecord, TrainingHistory};
use super::monitor::MetricMonitor;
use super::scheduler::LrController;
use crate::config::TrainingSettings;
use crate::dataset::burn_dataset::{LesionBatcher, LesionDataset};
use crate::dataset::loader::Label;
use crate::evaluation::evaluator::evaluate_pass;
use crate::evaluation::metrics::{roc_auc_score, threshold_predictions, ConfusionMatrix, RunningAverage};
use crate::model::classifier::{ClassifierConfig, LesionClassifier};
use crate::utils::error::{LesionError, Result, ResultExt};
use crate::utils::logging::TrainingLogger;

/// Adam over the lesion classifier
pub type LesionOptimizer<B> = OptimizerAdaptor<Adam, LesionClassifier<B>, B>;

/// Mean binary cross-entropy computed from logits.
///
/// Uses `max(x, 0) - x * y + ln(1 + e^-|x|)`, which never overflows.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let softplus = logits.clone().abs().neg().exp().log1p();
    (logits.clone().clamp_min(0.0) - logits * targets + softplus).mean()
}

/// Copy a tensor to host memory as `f64`
pub fn to_f64_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f64>> {
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LesionError::Training(format!("Failed to read tensor data: {:?}", e)))?;
    Ok(values.into_iter().map(f64::from).collect())
}

/// Where the trainer writes its artefacts
#[derive(Debug, Clone)]
pub struct FitPaths {
    pub best_checkpoint: PathBuf,
    pub last_checkpoint: PathBuf,
    pub log_dir: PathBuf,
}

impl FitPaths {
    pub fn new(output_dir: &std::path::Path, log_dir: PathBuf, base_name: &str) -> Self {
        Self {
            best_checkpoint: output_dir.join(CheckpointKind::Best.dir_name(base_name)),
            last_checkpoint: output_dir.join(CheckpointKind::Last.dir_name(base_name)),
            log_dir,
        }
    }
}

/// Metrics of one pass over a dataset
#[derive(Debug, Clone, Default)]
pub struct PassMetrics {
    pub loss: f64,
    pub accuracy: f64,
    /// Exact ROC AUC; 0 when only one class was seen
    pub auc: f64,
}

impl PassMetrics {
    pub fn from_predictions(loss: f64, probabilities: &[f64], labels: &[Label], threshold: f64) -> Self {
        let predictions = threshold_predictions(probabilities, threshold);
        let accuracy = ConfusionMatrix::from_predictions(&predictions, labels).accuracy();
        let auc = roc_auc_score(labels, probabilities).unwrap_or_else(|| {
            debug!("AUC undefined for a single-class pass, reporting 0");
            0.0
        });

        Self { loss, accuracy, auc }
    }
}

/// Result of [`Trainer::fit`]
pub struct FitOutcome<B: AutodiffBackend> {
    /// Best weights when stopped early, final weights otherwise
    pub model: LesionClassifier<B>,
    pub history: TrainingHistory,
    pub best_epoch: Option<usize>,
    pub stopped_epoch: Option<usize>,
}

/// Trainer for the lesion classifier
pub struct Trainer<B: AutodiffBackend> {
    pub model: LesionClassifier<B>,
    optimizer: LesionOptimizer<B>,
    architecture: ClassifierConfig,
    settings: TrainingSettings,
    batcher: LesionBatcher,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        model: LesionClassifier<B>,
        architecture: ClassifierConfig,
        settings: TrainingSettings,
        device: B::Device,
    ) -> Self {
        let optimizer = AdamConfig::new()
            .with_epsilon(settings.adam_epsilon as f32)
            .init();
        let batcher = LesionBatcher::new(architecture.image_height, architecture.image_width);

        Self {
            model,
            optimizer,
            architecture,
            settings,
            batcher,
            device,
        }
    }

    /// One pass of mini-batch updates over `order`.
    ///
    /// Runs `floor(len / batch_size)` batches (at least one); the trailing
    /// partial batch is dropped.
    pub fn train_epoch(&mut self, dataset: &LesionDataset, order: &[usize], lr: f64) -> Result<PassMetrics> {
        let batch_size = self.settings.batch_size;
        let num_batches = (order.len() / batch_size).max(1);

        let mut loss_avg = RunningAverage::new();
        let mut probabilities = Vec::with_capacity(num_batches * batch_size);
        let mut labels = Vec::with_capacity(num_batches * batch_size);

        for batch_idx in 0..num_batches {
            let start = batch_idx * batch_size;
            let end = (start + batch_size).min(order.len());

            let items = order[start..end]
                .iter()
                .map(|&i| dataset.get(i).with_context(|| format!("Training sample {} unavailable", i)))
                .collect::<Result<Vec<_>>>()?;
            if items.is_empty() {
                continue;
            }
            labels.extend(items.iter().map(|item| item.label));

            let batch = self.batcher.batch(items, &self.device);
            let logits = self.model.forward(batch.images).flatten::<1>(0, 1);
            let loss = bce_with_logits(logits.clone(), batch.targets);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_avg.add(loss_value);
            probabilities.extend(to_f64_vec(sigmoid(logits.detach()))?);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "  Batch {:>4}/{}: loss = {:.4}",
                    batch_idx + 1,
                    num_batches,
                    loss_value
                );
            }
        }

        Ok(PassMetrics::from_predictions(
            loss_avg.average(),
            &probabilities,
            &labels,
            self.settings.decision_threshold,
        ))
    }

    /// Full in-order pass over `dataset` with the inference model.
    /// Returns the metrics and the malignant probabilities.
    pub fn validate(&self, dataset: &LesionDataset) -> Result<(PassMetrics, Vec<f64>)> {
        let pass = evaluate_pass(
            &self.model.valid(),
            dataset,
            &self.batcher,
            self.settings.batch_size,
            &self.device,
        )?;

        let metrics = PassMetrics::from_predictions(
            pass.loss,
            &pass.probabilities,
            &pass.labels,
            self.settings.decision_threshold,
        );
        Ok((metrics, pass.probabilities))
    }

    fn save(&self, dir: &std::path::Path, kind: CheckpointKind, epoch: usize, value: f64) -> Result<()> {
        let metadata = CheckpointMetadata::new(kind, epoch, value, &self.architecture);
        save_checkpoint(dir, &self.model, &self.optimizer, &self.architecture, &metadata)
    }

    /// Run the epoch loop until the budget is spent or early stopping fires.
    ///
    /// The best checkpoint is written whenever `val_auc` strictly improves and
    /// the last checkpoint once training ends.
    pub fn fit<R: Rng + ?Sized>(
        mut self,
        train: &LesionDataset,
        validation: &LesionDataset,
        paths: &FitPaths,
        rng: &mut R,
    ) -> Result<FitOutcome<B>> {
        if train.is_empty() {
            return Err(LesionError::Training("training set is empty".to_string()));
        }
        if validation.is_empty() {
            return Err(LesionError::Training("validation set is empty".to_string()));
        }

        let epochs = self.settings.epochs;

        let mut lr_controller =
            LrController::new(self.settings.lr_policy.clone(), self.settings.initial_learning_rate);
        let mut stopper = EarlyStopping::new(MetricMonitor::maximize(), self.settings.early_stopping_patience);
        let mut checkpoints = CheckpointPolicy::new(&paths.best_checkpoint, MetricMonitor::maximize());
        let mut histograms = HistogramWriter::create(&paths.log_dir, self.settings.histogram_freq)?;
        let mut logger = TrainingLogger::new(epochs);
        let mut history = TrainingHistory::new();

        info!(
            "Training on {} samples, validating on {} ({})",
            train.len(),
            validation.len(),
            self.settings.lr_policy.description()
        );

        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut last_epoch = 0;

        for epoch in 0..epochs {
            let lr = lr_controller.begin_epoch(epoch);
            logger.start_epoch(epoch, lr);

            order.shuffle(rng);
            let train_metrics = self.train_epoch(train, &order, lr)?;
            let (val_metrics, val_probabilities) = self.validate(validation)?;

            let record = EpochRecord {
                epoch,
                loss: train_metrics.loss,
                accuracy: train_metrics.accuracy,
                auc: train_metrics.auc,
                val_loss: val_metrics.loss,
                val_accuracy: val_metrics.accuracy,
                val_auc: val_metrics.auc,
                lr,
            };
            history.push(&record);
            logger.end_epoch(record.loss, record.val_loss, record.val_accuracy, record.val_auc);

            if let Some(writer) = histograms.as_mut().filter(|w| w.should_log(epoch)) {
                let mut tensors = Vec::new();
                for (name, weights) in self.model.valid().head_weights() {
                    tensors.push((name, to_f64_vec(weights)?));
                }
                tensors.push(("val_probabilities".to_string(), val_probabilities));
                writer.write(&record, &tensors)?;
            }

            let previous_best = checkpoints.best();
            if checkpoints.should_save(record.val_auc) {
                logger.log_new_best(record.val_auc, previous_best);
                self.save(checkpoints.dir(), CheckpointKind::Best, epoch, record.val_auc)?;
            }

            let outcome = stopper.observe(epoch, record.val_auc, &self.model);
            lr_controller.end_epoch(record.val_auc);
            last_epoch = epoch;

            if outcome.stop {
                logger.log_early_stop(stopper.patience(), stopper.best_epoch().unwrap_or(epoch));
                if let Some(best) = stopper.take_best() {
                    self.model = best;
                }
                break;
            }
        }

        let last_value = history.val_auc.last().copied().unwrap_or(f64::NAN);
        self.save(&paths.last_checkpoint, CheckpointKind::Last, last_epoch, last_value)?;

        logger.log_complete(history.len(), stopper.best_value().unwrap_or(f64::NAN));

        Ok(FitOutcome {
            model: self.model,
            history,
            best_epoch: stopper.best_epoch(),
            stopped_epoch: stopper.stopped_epoch(),
        })
    }
}
