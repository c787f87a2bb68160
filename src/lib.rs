//! # Lesion Classifier
//!
//! Binary skin-lesion classification (benign vs malignant) with transfer
//! learning on the Burn framework.
//!
//! ## Features
//!
//! - **Four backbones**: ResNet152, an EfficientNet feature extractor, Xception and a compact CNN
//! - **Class balancing** of the training split to a requested size
//! - **Training controller** with save-best checkpoints, early stopping on validation AUC and
//!   a piecewise learning-rate schedule
//! - **Evaluation** with ROC and precision-recall curves, confusion matrix and plots
//!
//! ## Modules
//!
//! - `dataset`: CSV splits, class balancing and Burn batching
//! - `model`: Backbones, heads and the model factory
//! - `training`: Epoch loop, checkpoints, early stopping and learning-rate policies
//! - `evaluation`: Test-set pass and binary metrics
//! - `report`: History blob and text report
//! - `pipeline`: End-to-end experiment
//! - `utils`: Logging, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lesion_classifier::config::ExperimentConfig;
//!
//! let mut config = ExperimentConfig::default();
//! config.data.num_desired_train_examples = 200;
//! let summary = lesion_classifier::pipeline::run(&config)?;
//! println!("test AUC: {:.4}", summary.report.test_auc);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod training;
pub mod utils;

pub use config::ExperimentConfig;
pub use dataset::{Label, LesionBatcher, LesionDataset};
pub use evaluation::{ConfusionMatrix, EvaluationReport};
pub use model::{BackboneKind, LesionClassifier};
pub use training::{Trainer, TrainingHistory};
pub use utils::error::{LesionError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
