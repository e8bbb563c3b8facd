//! Inference module for serving predictions
//!
//! This module provides:
//! - Checkpoint loading into a non-autodiff `Predictor`
//! - Top-1 prediction from images, raw upload bytes or files
//! - Top-k listing for the CLI
//!
//! The HTTP service in the `server` crate wraps a `Predictor`.

pub mod predictor;

pub use predictor::{top_k, Prediction, Predictor};
