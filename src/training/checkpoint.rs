//! Checkpoint persistence
//!
//! A checkpoint is a directory:
//!
//! ```text
//! best_model_<base>/
//!   model.mpk          weights
//!   optimizer.mpk      optimizer state
//!   architecture.json  ClassifierConfig
//!   checkpoint.json    CheckpointMetadata
//! ```
//!
//! The architecture file makes a checkpoint self-describing: reloading never
//! needs to know in advance which backbone produced it.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    optim::Optimizer,
    record::Recorder,
    tensor::backend::{AutodiffBackend, Backend},
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::monitor::MetricMonitor;
use crate::model::classifier::{ClassifierConfig, LesionClassifier, WeightsRecorder};
use crate::utils::error::{LesionError, Result};

const MODEL_STEM: &str = "model";
const OPTIMIZER_STEM: &str = "optimizer";
const ARCHITECTURE_FILE: &str = "architecture.json";
const METADATA_FILE: &str = "checkpoint.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Best,
    Last,
}

impl CheckpointKind {
    /// Directory name for a run's base name
    pub fn dir_name(&self, base_name: &str) -> String {
        match self {
            CheckpointKind::Best => format!("best_model_{}", base_name),
            CheckpointKind::Last => format!("last_model_{}", base_name),
        }
    }
}

/// Written next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub kind: CheckpointKind,
    /// 0-based epoch whose weights were saved
    pub epoch: usize,
    pub monitor: String,
    pub monitor_value: f64,
    pub backbone: String,
    pub saved_at: DateTime<Local>,
}

impl CheckpointMetadata {
    pub fn new(kind: CheckpointKind, epoch: usize, monitor_value: f64, config: &ClassifierConfig) -> Self {
        Self {
            kind,
            epoch,
            monitor: "val_auc".to_string(),
            monitor_value,
            backbone: config.kind().model_name().to_string(),
            saved_at: Local::now(),
        }
    }
}

/// Save-best policy: overwrite the "best" checkpoint whenever the monitored
/// metric strictly improves.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    dir: PathBuf,
    monitor: MetricMonitor,
}

impl CheckpointPolicy {
    pub fn new(dir: impl Into<PathBuf>, monitor: MetricMonitor) -> Self {
        Self {
            dir: dir.into(),
            monitor,
        }
    }

    /// Whether `value` warrants a save; records it when it does
    pub fn should_save(&mut self, value: f64) -> bool {
        self.monitor.update(value)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best(&self) -> Option<f64> {
        self.monitor.best()
    }
}

fn checkpoint_error(dir: &Path, what: &str, e: impl std::fmt::Debug) -> LesionError {
    LesionError::Checkpoint(dir.to_path_buf(), format!("{}: {:?}", what, e))
}

/// Write model, optimizer state, architecture and metadata into `dir`
pub fn save_checkpoint<B, O>(
    dir: &Path,
    model: &LesionClassifier<B>,
    optimizer: &O,
    config: &ClassifierConfig,
    metadata: &CheckpointMetadata,
) -> Result<()>
where
    B: AutodiffBackend,
    O: Optimizer<LesionClassifier<B>, B>,
{
    fs::create_dir_all(dir)?;
    let recorder = WeightsRecorder::new();

    model
        .clone()
        .save_file(dir.join(MODEL_STEM), &recorder)
        .map_err(|e| checkpoint_error(dir, "failed to save model", e))?;

    <WeightsRecorder as Recorder<B>>::record(&recorder, optimizer.to_record(), dir.join(OPTIMIZER_STEM))
        .map_err(|e| checkpoint_error(dir, "failed to save optimizer state", e))?;

    fs::write(dir.join(ARCHITECTURE_FILE), serde_json::to_string_pretty(config)?)?;
    fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(metadata)?)?;

    debug!(
        "Saved {:?} checkpoint (epoch {}, {} = {:.4}) to {:?}",
        metadata.kind,
        metadata.epoch + 1,
        metadata.monitor,
        metadata.monitor_value,
        dir
    );
    Ok(())
}

pub fn load_metadata(dir: &Path) -> Result<CheckpointMetadata> {
    let path = dir.join(METADATA_FILE);
    let content = fs::read_to_string(&path).map_err(|e| checkpoint_error(dir, "missing metadata", e))?;
    serde_json::from_str(&content).map_err(|e| checkpoint_error(dir, "invalid metadata", e))
}

pub fn load_architecture(dir: &Path) -> Result<ClassifierConfig> {
    let path = dir.join(ARCHITECTURE_FILE);
    let content =
        fs::read_to_string(&path).map_err(|e| checkpoint_error(dir, "missing architecture", e))?;
    serde_json::from_str(&content).map_err(|e| checkpoint_error(dir, "invalid architecture", e))
}

/// Rebuild the classifier described by `architecture.json` and load its weights
pub fn load_classifier<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, ClassifierConfig, CheckpointMetadata)> {
    let config = load_architecture(dir)?;
    let metadata = load_metadata(dir)?;

    let recorder = WeightsRecorder::new();
    let model = config
        .init::<B>(device)
        .load_file(dir.join(MODEL_STEM), &recorder, device)
        .map_err(|e| checkpoint_error(dir, "failed to load model", e))?;

    info!(
        "Loaded {} checkpoint from epoch {} ({} = {:.4})",
        metadata.backbone,
        metadata.epoch + 1,
        metadata.monitor,
        metadata.monitor_value
    );

    Ok((model, config, metadata))
}

/// Restore optimizer state saved alongside a checkpoint
pub fn load_optimizer<B, O>(dir: &Path, optimizer: O, device: &B::Device) -> Result<O>
where
    B: AutodiffBackend,
    O: Optimizer<LesionClassifier<B>, B>,
{
    let recorder = WeightsRecorder::new();
    let record = <WeightsRecorder as Recorder<B>>::load(&recorder, dir.join(OPTIMIZER_STEM), device)
        .map_err(|e| checkpoint_error(dir, "failed to load optimizer state", e))?;
    Ok(optimizer.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneKind;
    use burn::backend::Autodiff;
    use burn::module::AutodiffModule;
    use burn::optim::AdamConfig;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_policy_saves_only_on_strict_improvement() {
        let mut policy = CheckpointPolicy::new("unused", MetricMonitor::maximize());
        let decisions: Vec<bool> = [0.6, 0.7, 0.7, 0.65, 0.71, f64::NAN]
            .into_iter()
            .map(|v| policy.should_save(v))
            .collect();

        assert_eq!(decisions, vec![true, true, false, false, true, false]);
        assert_eq!(policy.best(), Some(0.71));
    }

    #[test]
    fn test_dir_names() {
        assert_eq!(CheckpointKind::Best.dir_name("xception40"), "best_model_xception40");
        assert_eq!(CheckpointKind::Last.dir_name("xception40"), "last_model_xception40");
    }

    #[test]
    fn test_save_and_reload_reproduces_predictions() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_dir = dir.path().join(CheckpointKind::Best.dir_name("compact_cnn20"));

        let config = ClassifierConfig::for_backbone(BackboneKind::CompactCnn, 32, 32);
        let model = config.init::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, LesionClassifier<TestBackend>>();
        let metadata = CheckpointMetadata::new(CheckpointKind::Best, 3, 0.8, &config);

        save_checkpoint(&checkpoint_dir, &model, &optimizer, &config, &metadata).unwrap();
        assert!(checkpoint_dir.join("model.mpk").exists());
        assert!(checkpoint_dir.join("optimizer.mpk").exists());

        let (reloaded, reloaded_config, reloaded_meta) =
            load_classifier::<NdArray>(&checkpoint_dir, &device).unwrap();
        assert_eq!(reloaded_config.kind(), BackboneKind::CompactCnn);
        assert_eq!(reloaded_meta.epoch, 3);
        assert_eq!(reloaded_meta.kind, CheckpointKind::Best);

        let images = Tensor::<NdArray, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let expected = model.valid().predict(images.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = reloaded.predict(images).into_data().to_vec::<f32>().unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        let optimizer = AdamConfig::new().init::<TestBackend, LesionClassifier<TestBackend>>();
        assert!(load_optimizer::<TestBackend, _>(&checkpoint_dir, optimizer, &device).is_ok());
    }

    #[test]
    fn test_missing_checkpoint_is_checkpoint_error() {
        let device = Default::default();
        let result = load_classifier::<NdArray>(Path::new("/nonexistent/best_model_x"), &device);
        assert!(matches!(result, Err(LesionError::Checkpoint(..))));
    }
}
