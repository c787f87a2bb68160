//! Error Handling Module
//!
//! Defines the error type shared by every stage of the lesion pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for lesion classification operations
#[derive(Error, Debug)]
pub enum LesionError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error reading a dataset CSV file
    #[error("CSV error in '{path}': {message}")]
    Csv { path: PathBuf, message: String },

    /// Error with dataset contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction
    #[error("Model error: {0}")]
    Model(String),

    /// Pretrained backbone weights could not be resolved
    #[error("Pretrained weights for '{backbone}' unavailable at '{path}': {reason}")]
    PretrainedWeights {
        backbone: String,
        path: PathBuf,
        reason: String,
    },

    /// Error while training
    #[error("Training error: {0}")]
    Training(String),

    /// Error saving or restoring a checkpoint
    #[error("Checkpoint error at '{0}': {1}")]
    Checkpoint(PathBuf, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience Result type for lesion classification operations
pub type Result<T> = std::result::Result<T, LesionError>;

impl From<serde_json::Error> for LesionError {
    fn from(err: serde_json::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LesionError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LesionError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LesionError {
    fn from(err: toml::de::Error) -> Self {
        LesionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LesionError {
    fn from(err: toml::ser::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| LesionError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| LesionError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LesionError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| LesionError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LesionError::Dataset("no rows".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no rows");
    }

    #[test]
    fn test_pretrained_error_names_backbone() {
        let err = LesionError::PretrainedWeights {
            backbone: "resnet152".to_string(),
            path: PathBuf::from("weights/resnet152.mpk"),
            reason: "file not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("resnet152"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read file").unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }
}
