//! Dataset module for skin-lesion data handling
//!
//! This module provides functionality for:
//! - Reading the train/validation/test CSV splits
//! - Balancing the training split to a requested size
//! - Decoding images into Burn batches

pub mod balance;
pub mod burn_dataset;
pub mod loader;

pub use balance::balance_classes;
pub use burn_dataset::{LesionBatch, LesionBatcher, LesionDataset, LesionItem};
pub use loader::{load_split, Label, LesionRecord, LesionSplit};
