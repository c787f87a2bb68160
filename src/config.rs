//! Experiment configuration
//!
//! Every path and hyperparameter of a training run lives in
//! [`ExperimentConfig`]. Defaults reproduce the reference HAM10000 setup;
//! a TOML file may override any subset of fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::BackboneKind;
use crate::training::scheduler::LrPolicy;
use crate::utils::error::{LesionError, Result};

/// Sentinel for "use every training row"
pub const ALL_TRAIN_EXAMPLES: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Groups outputs under `id_<simulation_id>`
    pub simulation_id: u32,
    /// Seed for balancing and shuffling; entropy when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub data: DataConfig,
    pub model: ModelSettings,
    pub training: TrainingSettings,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_csv: PathBuf,
    pub validation_csv: PathBuf,
    pub test_csv: PathBuf,
    pub train_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub test_dir: PathBuf,
    /// Appended to every `image_name` (e.g. ".jpg" when the CSV omits it)
    pub image_suffix: String,
    pub image_height: usize,
    pub image_width: usize,
    /// Target training-set size, split evenly between classes; -1 keeps all rows
    pub num_desired_train_examples: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub backbone: BackboneKind,
    /// Load backbone weights from `weights_dir`
    pub pretrained: bool,
    /// Mark backbone parameters as frozen
    pub freeze_backbone: bool,
    /// Open the backbone's fine-tuning range when frozen
    pub trainable: bool,
    pub weights_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub epochs: usize,
    /// Optimizer rate before the policy first adjusts it
    pub initial_learning_rate: f64,
    pub adam_epsilon: f64,
    pub lr_policy: LrPolicy,
    /// Epochs without `val_auc` improvement before stopping
    pub early_stopping_patience: usize,
    /// Probability above which a prediction counts as malignant
    pub decision_threshold: f64,
    /// Write histogram events every N epochs, 0 disables them
    pub histogram_freq: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_root: PathBuf,
    pub log_root: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            simulation_id: 22,
            seed: None,
            data: DataConfig::default(),
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        let root = PathBuf::from("data/ham10000");
        let images = root.join("HAM10000_images_part_1");
        Self {
            train_csv: root.join("train.csv"),
            validation_csv: root.join("validation.csv"),
            test_csv: root.join("test.csv"),
            train_dir: images.clone(),
            validation_dir: images.clone(),
            test_dir: images,
            image_suffix: String::new(),
            image_height: 120,
            image_width: 90,
            num_desired_train_examples: ALL_TRAIN_EXAMPLES,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backbone: BackboneKind::ResNet152,
            pretrained: true,
            freeze_backbone: true,
            trainable: false,
            weights_dir: PathBuf::from("weights"),
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            batch_size: 12,
            epochs: 100,
            initial_learning_rate: 0.005,
            adam_epsilon: 1e-7,
            lr_policy: LrPolicy::default(),
            early_stopping_patience: 10,
            decision_threshold: 0.5,
            histogram_freq: 1,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("outputs/train_test"),
            log_root: PathBuf::from("outputs/tensorboard_logs"),
        }
    }
}

impl ExperimentConfig {
    /// Load a TOML config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LesionError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            LesionError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(LesionError::Config("batch_size must be positive".to_string()));
        }
        if t.epochs == 0 {
            return Err(LesionError::Config("epochs must be positive".to_string()));
        }
        if t.initial_learning_rate <= 0.0 {
            return Err(LesionError::Config("initial_learning_rate must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&t.decision_threshold) {
            return Err(LesionError::Config("decision_threshold must be in [0, 1]".to_string()));
        }
        t.lr_policy.validate().map_err(LesionError::Config)?;

        let d = &self.data;
        if d.image_height == 0 || d.image_width == 0 {
            return Err(LesionError::Config("image size must be non-zero".to_string()));
        }
        if d.num_desired_train_examples != ALL_TRAIN_EXAMPLES && d.num_desired_train_examples <= 0 {
            return Err(LesionError::Config(format!(
                "num_desired_train_examples must be -1 or positive, got {}",
                d.num_desired_train_examples
            )));
        }
        Ok(())
    }

    /// Per-class caps `(n0, n1)` for the balancer, or None to keep all rows
    pub fn balance_caps(&self) -> Option<(usize, usize)> {
        let total = self.data.num_desired_train_examples;
        if total == ALL_TRAIN_EXAMPLES || total < 0 {
            return None;
        }
        let total = total as usize;
        let negatives = total / 2;
        Some((negatives, total - negatives))
    }

    /// `<model_name><count>`, the stem of every output file name
    pub fn base_name(&self, train_examples: i64) -> String {
        format!("{}{}", self.model.backbone.model_name(), train_examples)
    }

    /// Output directory, named after the requested training-set size
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .output_root
            .join(format!("id_{}", self.simulation_id))
            .join(self.base_name(self.data.num_desired_train_examples))
    }

    /// Histogram event directory for a run
    pub fn log_dir(&self, base_name: &str) -> PathBuf {
        self.output.log_root.join(base_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = ExperimentConfig::default();
        assert_eq!(config.simulation_id, 22);
        assert_eq!(config.training.batch_size, 12);
        assert_eq!(config.training.epochs, 100);
        assert_eq!(config.training.early_stopping_patience, 10);
        assert_eq!((config.data.image_height, config.data.image_width), (120, 90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_balance_caps_split() {
        let mut config = ExperimentConfig::default();
        assert_eq!(config.balance_caps(), None);

        config.data.num_desired_train_examples = 41;
        assert_eq!(config.balance_caps(), Some((20, 21)));

        config.data.num_desired_train_examples = 40;
        assert_eq!(config.balance_caps(), Some((20, 20)));
    }

    #[test]
    fn test_output_layout() {
        let mut config = ExperimentConfig::default();
        config.data.num_desired_train_examples = 200;
        assert_eq!(config.base_name(198), "resnet152198");
        assert_eq!(
            config.output_dir(),
            PathBuf::from("outputs/train_test/id_22/resnet152200")
        );
        assert_eq!(
            ExperimentConfig::default().output_dir(),
            PathBuf::from("outputs/train_test/id_22/resnet152-1")
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.data.num_desired_train_examples = -5;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
            seed = 7

            [model]
            backbone = "compact_cnn"
            pretrained = false

            [training]
            epochs = 3

            [training.lr_policy]
            kind = "reduce_on_plateau"
            factor = 0.5
            patience = 3
            min_delta = 1e-5
            min_lr = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(7));
        assert_eq!(config.model.backbone, BackboneKind::CompactCnn);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 12);
        assert_eq!(config.training.lr_policy, LrPolicy::reduce_on_plateau());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");

        let mut config = ExperimentConfig::default();
        config.seed = Some(11);
        config.model.backbone = BackboneKind::Xception;
        config.save(&path).unwrap();

        assert_eq!(ExperimentConfig::load(&path).unwrap(), config);
    }
}
