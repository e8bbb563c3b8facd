//! Model Configuration Module
//!
//! Describes how a classifier is assembled for a run: which backbone, how
//! many outputs, where the pretrained ImageNet weights live and whether the
//! backbone is frozen.

use std::path::PathBuf;

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Architecture, CoffeeClassifier, IMAGENET_CLASSES};
use crate::dataset::NUM_CLASSES;
use crate::utils::error::{CoffeeDefectError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architecture: Architecture,

    /// Width of the replacement head
    pub num_classes: usize,

    /// Only the classifier block is trained when set
    pub freeze_backbone: bool,

    /// Burn record of the ImageNet weights, converted offline
    pub pretrained_weights: Option<PathBuf>,
}

impl ModelConfig {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            num_classes: NUM_CLASSES,
            freeze_backbone: true,
            pretrained_weights: None,
        }
    }

    pub fn with_pretrained_weights(mut self, path: Option<PathBuf>) -> Self {
        self.pretrained_weights = path;
        self
    }

    pub fn with_freeze_backbone(mut self, freeze: bool) -> Self {
        self.freeze_backbone = freeze;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Build the ImageNet-shaped network, load pretrained weights if any,
    /// swap the head, then freeze.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CoffeeClassifier<B>> {
        if self.num_classes == 0 {
            return Err(CoffeeDefectError::Config("num_classes must be positive".into()));
        }

        let mut model = CoffeeClassifier::new(self.architecture, IMAGENET_CLASSES, device);

        match &self.pretrained_weights {
            Some(path) => {
                let record_path = if path.exists() {
                    path.clone()
                } else {
                    let mut with_ext = path.as_os_str().to_owned();
                    with_ext.push(".mpk");
                    PathBuf::from(with_ext)
                };
                if !record_path.exists() {
                    return Err(CoffeeDefectError::Model(format!(
                        "pretrained weights not found: {:?}",
                        path
                    )));
                }

                model = model
                    .load_file(record_path.clone(), &CompactRecorder::new(), device)
                    .map_err(|e| {
                        CoffeeDefectError::Model(format!(
                            "failed to load pretrained {} weights from {:?}: {}",
                            self.architecture, record_path, e
                        ))
                    })?;
                info!("Loaded pretrained {} weights from {:?}", self.architecture, record_path);
            }
            None => warn!(
                "No pretrained weights for {}; training starts from random initialization",
                self.architecture
            ),
        }

        let mut model = model.with_head(self.num_classes, device);
        if self.freeze_backbone {
            model = model.freeze_backbone();
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type B = NdArray<f32>;

    #[test]
    fn test_init_without_weights() {
        let device = Default::default();
        let model = ModelConfig::new(Architecture::MobileNetV3)
            .init::<B>(&device)
            .unwrap();
        assert_eq!(model.num_classes(), NUM_CLASSES);
    }

    #[test]
    fn test_missing_weights_are_fatal() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let result = ModelConfig::new(Architecture::MobileNetV3)
            .with_pretrained_weights(Some(dir.path().join("imagenet_mobilenet_v3")))
            .init::<B>(&device);
        assert!(matches!(result, Err(CoffeeDefectError::Model(_))));
    }

    #[test]
    fn test_pretrained_weights_are_loaded_before_head_swap() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let path = dir.path().join("imagenet_mobilenet_v3.mpk");

        let imagenet = CoffeeClassifier::<B>::new(Architecture::MobileNetV3, IMAGENET_CLASSES, &device);
        imagenet.save_file(path.clone(), &CompactRecorder::new()).unwrap();

        let model = ModelConfig::new(Architecture::MobileNetV3)
            .with_pretrained_weights(Some(path))
            .with_num_classes(4)
            .init::<B>(&device)
            .unwrap();
        assert_eq!(model.num_classes(), 4);
    }
}
