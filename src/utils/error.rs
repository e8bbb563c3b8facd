//! Error Handling Module
//!
//! Defines the error type shared by the training pipeline and the predictor.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for coffee defect operations
#[derive(Error, Debug)]
pub enum CoffeeDefectError {
    /// Invalid configuration (unknown architecture, bad hyperparameters, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error loading or decoding an image file
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Uploaded or in-memory content is not a decodable image
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Error with model construction or weights
    #[error("Model error: {0}")]
    Model(String),

    /// Error reading or writing checkpoints and their metadata
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoffeeDefectError {
    fn from(err: serde_json::Error) -> Self {
        CoffeeDefectError::Serialization(err.to_string())
    }
}

/// Convenience Result type for coffee defect operations
pub type Result<T> = std::result::Result<T, CoffeeDefectError>;
