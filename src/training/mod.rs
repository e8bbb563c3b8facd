//! Training module for transfer learning on coffee bean images
//!
//! This module provides:
//! - Run and sweep configuration (`RunConfig`, `TrainingConfig`)
//! - The epoch loop with Adam and early stopping (`trainer`)
//! - Gradient-free evaluation over a split (`evaluation`)
//! - Checkpoint naming, saving and loading (`checkpoint`)
//! - End-to-end run orchestration (`supervised`)
//!
//! ## Transfer Learning Approach
//!
//! 1. Build the backbone and load its ImageNet weights
//! 2. Replace the classifier head with a 17-way layer
//! 3. Freeze the backbone and train only the head
//! 4. Stop once validation accuracy stalls, then test and checkpoint

pub mod checkpoint;
pub mod early_stopping;
pub mod evaluation;
pub mod supervised;
pub mod trainer;

pub use checkpoint::{
    load_checkpoint, results_key, save_checkpoint, save_results, CheckpointMetadata, CheckpointName,
    RunResult, RunResults,
};
pub use early_stopping::{EarlyStopping, DEFAULT_PATIENCE};
pub use evaluation::{evaluate, EvaluationOutput};
pub use supervised::{run_sweep, run_training};
pub use trainer::{ModelTrainer, TrainingHistory, TrainingPhase};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::transform::IMAGE_SIZE;
use crate::model::{Architecture, ModelConfig};
use crate::utils::error::{CoffeeDefectError, Result};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 20;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Default Adam weight decay
pub const DEFAULT_WEIGHT_DECAY: f64 = 1e-4;

/// Hyperparameters of a single training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub architecture: Architecture,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub weight_decay: f64,
    pub patience: usize,
    pub freeze_backbone: bool,
    /// Burn record of the ImageNet weights for `architecture`
    pub pretrained_weights: Option<PathBuf>,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::ConvNextTiny,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            epochs: DEFAULT_EPOCHS,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            patience: DEFAULT_PATIENCE,
            freeze_backbone: true,
            pretrained_weights: None,
            seed: 42,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CoffeeDefectError::Config("batch_size must be greater than 0".into()));
        }
        if self.epochs == 0 {
            return Err(CoffeeDefectError::Config("epochs must be greater than 0".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(CoffeeDefectError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(CoffeeDefectError::Config("weight_decay must not be negative".into()));
        }
        Ok(())
    }

    /// Model assembly settings for this run
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.architecture)
            .with_freeze_backbone(self.freeze_backbone)
            .with_pretrained_weights(self.pretrained_weights.clone())
    }

    pub fn results_key(&self) -> String {
        results_key(self.architecture, self.batch_size, self.learning_rate)
    }
}

/// Where the data lives and which runs to execute against it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
    pub test_dir: PathBuf,
    pub models_dir: PathBuf,
    pub image_size: usize,
    pub runs: Vec<RunConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::from_data_dir("data/processed")
    }
}

impl TrainingConfig {
    /// `<data_dir>/{train,val,test}` with checkpoints under `models/`
    pub fn from_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            train_dir: data_dir.join("train"),
            val_dir: data_dir.join("val"),
            test_dir: data_dir.join("test"),
            models_dir: PathBuf::from("models"),
            image_size: IMAGE_SIZE,
            runs: vec![RunConfig::default()],
        }
    }

    pub fn with_models_dir<P: Into<PathBuf>>(mut self, models_dir: P) -> Self {
        self.models_dir = models_dir.into();
        self
    }

    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size;
        self
    }

    pub fn with_runs(mut self, runs: Vec<RunConfig>) -> Self {
        self.runs = runs;
        self
    }

    /// Sweep results file
    pub fn results_path(&self) -> PathBuf {
        self.models_dir.join("training_results.json")
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(CoffeeDefectError::Config("image_size must be greater than 0".into()));
        }
        if self.runs.is_empty() {
            return Err(CoffeeDefectError::Config("no runs configured".into()));
        }
        for run in &self.runs {
            run.validate()?;
        }
        Ok(())
    }

    /// Read a sweep file: a JSON list of run configs. Missing fields take
    /// their defaults.
    pub fn load_runs(path: &Path) -> Result<Vec<RunConfig>> {
        let json = std::fs::read_to_string(path)?;
        let runs: Vec<RunConfig> = serde_json::from_str(&json)?;
        if runs.is_empty() {
            return Err(CoffeeDefectError::Config(format!("{:?} lists no runs", path)));
        }
        for run in &runs {
            run.validate()?;
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_config_defaults() {
        let run = RunConfig::default();
        assert_eq!(run.architecture, Architecture::ConvNextTiny);
        assert_eq!(run.batch_size, 8);
        assert_eq!(run.learning_rate, 0.001);
        assert_eq!(run.epochs, 20);
        assert_eq!(run.patience, 5);
        assert_eq!(run.seed, 42);
        assert!(run.validate().is_ok());
        assert_eq!(run.results_key(), "convnext_tiny_bs8_lr0.001");
    }

    #[test]
    fn test_run_config_validation() {
        let bad = [
            RunConfig { batch_size: 0, ..Default::default() },
            RunConfig { epochs: 0, ..Default::default() },
            RunConfig { learning_rate: 0.0, ..Default::default() },
            RunConfig { learning_rate: f64::NAN, ..Default::default() },
        ];
        for run in bad {
            assert!(matches!(run.validate(), Err(CoffeeDefectError::Config(_))), "{run:?}");
        }
    }

    #[test]
    fn test_training_config_layout() {
        let config = TrainingConfig::from_data_dir("data/processed").with_models_dir("out");
        assert_eq!(config.train_dir, PathBuf::from("data/processed/train"));
        assert_eq!(config.test_dir, PathBuf::from("data/processed/test"));
        assert_eq!(config.results_path(), PathBuf::from("out/training_results.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_runs_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.json");
        std::fs::write(
            &path,
            r#"[
                {"architecture": "resnet50", "batch_size": 16},
                {"architecture": "mobilenet_v3", "learning_rate": 0.0001, "freeze_backbone": false}
            ]"#,
        )
        .unwrap();

        let runs = TrainingConfig::load_runs(&path).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].architecture, Architecture::ResNet50);
        assert_eq!(runs[0].batch_size, 16);
        assert_eq!(runs[0].epochs, DEFAULT_EPOCHS);
        assert_eq!(runs[1].learning_rate, 0.0001);
        assert!(!runs[1].freeze_backbone);
    }

    #[test]
    fn test_load_runs_rejects_bad_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.json");

        std::fs::write(&path, "[]").unwrap();
        assert!(TrainingConfig::load_runs(&path).is_err());

        std::fs::write(&path, r#"[{"architecture": "vgg16"}]"#).unwrap();
        assert!(TrainingConfig::load_runs(&path).is_err());

        std::fs::write(&path, r#"[{"epochs": 0}]"#).unwrap();
        assert!(matches!(TrainingConfig::load_runs(&path), Err(CoffeeDefectError::Config(_))));
    }
}
