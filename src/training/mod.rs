//! Training controller
//!
//! This module contains:
//! - The epoch loop with Adam and binary cross-entropy
//! - Save-best and last checkpoints
//! - Early stopping on `val_auc`
//! - Learning-rate policies
//! - Histogram event logging

pub mod checkpoint;
pub mod early_stopping;
pub mod histograms;
pub mod history;
pub mod monitor;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{load_classifier, CheckpointKind, CheckpointMetadata, CheckpointPolicy};
pub use early_stopping::EarlyStopping;
pub use history::{EpochRecord, TrainingHistory};
pub use monitor::{MetricMonitor, PlateauMode};
pub use scheduler::{LrController, LrPolicy};
pub use trainer::{FitOutcome, FitPaths, Trainer};
