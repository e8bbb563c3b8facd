//! # Coffee Bean Defect Classification
//!
//! A Rust library for classifying green coffee bean defects with transfer
//! learning on the Burn framework.
//!
//! ## Features
//!
//! - **Transfer learning** from ImageNet backbones with a frozen feature extractor
//! - **Five backbones**: ResNet-50, EfficientNet-B0/B2, MobileNetV3-Large, ConvNeXt-Tiny
//! - **Hyperparameter sweeps** with early stopping and self-describing checkpoints
//! - **17 defect classes**, validated at every load
//!
//! ## Modules
//!
//! - `dataset`: Directory scanning, augmentation, Burn batching and split preparation
//! - `model`: Backbones and the classifier wrapper
//! - `training`: Training loop, evaluation, early stopping and checkpoints
//! - `inference`: The `Predictor` used by the CLI and the HTTP server
//! - `utils`: Logging, metrics, and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coffee_defect::backend::{default_device, InferenceBackend};
//! use coffee_defect::Predictor;
//!
//! let predictor = Predictor::<InferenceBackend>::load("models/best_model_....mpk".as_ref(), default_device())?;
//! let prediction = predictor.predict_path("bean.jpg".as_ref())?;
//! println!("{} ({:.2})", prediction.class_name, prediction.confidence);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    CoffeeBeanBatch, CoffeeBeanBatcher, CoffeeBeanBurnDataset, CoffeeBeanItem, CoffeeDefectDataset,
    CLASS_NAMES, NUM_CLASSES,
};
pub use dataset::transform::IMAGE_SIZE;
pub use inference::{Prediction, Predictor};
pub use model::{Architecture, CoffeeClassifier, ModelConfig};
pub use training::{
    CheckpointMetadata, CheckpointName, ModelTrainer, RunConfig, TrainingConfig, TrainingHistory,
};
pub use utils::error::{CoffeeDefectError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
