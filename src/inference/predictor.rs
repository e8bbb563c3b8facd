//! Inference Predictor Module
//!
//! `Predictor` owns a non-autodiff model, the class list it was trained on
//! and the device it runs on. It is created once (CLI command or server
//! startup) and passed to whoever needs it.

use std::path::Path;

use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::loader::load_rgb;
use crate::dataset::transform::{eval_tensor, IMAGE_SIZE};
use crate::dataset::{validate_class_names, CLASS_NAMES, NUM_CLASSES};
use crate::model::CoffeeClassifier;
use crate::training::checkpoint::load_checkpoint;
use crate::utils::error::{CoffeeDefectError, Result};

/// Top-1 answer for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: usize,
    pub class_name: String,
    /// Softmax probability of `class_id`, in [0, 1]
    pub confidence: f32,
}

impl Prediction {
    /// Pick the most probable class from a softmax row
    pub fn from_probabilities(probabilities: &[f32]) -> Result<Self> {
        let (class_id, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| CoffeeDefectError::Model("empty probability vector".into()))?;

        let class_name = CLASS_NAMES
            .get(class_id)
            .ok_or_else(|| CoffeeDefectError::Model(format!("class index {} out of range", class_id)))?;

        Ok(Self {
            class_id,
            class_name: class_name.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

/// The `k` most probable classes, best first
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<(usize, &'static str, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
        .into_iter()
        .take(k)
        .filter_map(|(idx, p)| CLASS_NAMES.get(idx).map(|name| (idx, *name, p)))
        .collect()
}

/// Model plus everything needed to turn an image into a `Prediction`
#[derive(Debug, Clone)]
pub struct Predictor<B: Backend> {
    model: CoffeeClassifier<B>,
    class_names: Vec<String>,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Wrap an in-memory model trained on the registered classes
    pub fn new(model: CoffeeClassifier<B>, class_names: Vec<String>, device: B::Device) -> Result<Self> {
        validate_class_names(&class_names)?;
        if model.num_classes() != NUM_CLASSES {
            return Err(CoffeeDefectError::Model(format!(
                "model head has {} outputs, expected {}",
                model.num_classes(),
                NUM_CLASSES
            )));
        }

        Ok(Self {
            model,
            class_names,
            image_size: IMAGE_SIZE,
            device,
        })
    }

    /// Load a checkpoint written by training
    pub fn load(checkpoint: &Path, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_checkpoint::<B>(checkpoint, &device)?;
        let predictor = Self::new(model, metadata.class_names, device)?.with_image_size(metadata.image_size);
        info!(
            "Predictor ready: {} at {}x{}",
            metadata.architecture, predictor.image_size, predictor.image_size
        );
        Ok(predictor)
    }

    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size.max(1);
        self
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Softmax over the classes for one image
    pub fn probabilities(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let input = eval_tensor::<B>(image, self.image_size, &self.device);
        self.model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| CoffeeDefectError::Model(format!("failed to read model output: {:?}", e)))
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let probabilities = self.probabilities(image)?;
        let prediction = Prediction::from_probabilities(&probabilities)?;
        debug!("Predicted {} ({:.4})", prediction.class_name, prediction.confidence);
        Ok(prediction)
    }

    /// Decode uploaded bytes and classify them
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        if bytes.is_empty() {
            return Err(CoffeeDefectError::InvalidImage("empty upload".into()));
        }
        let image = image::load_from_memory(bytes).map_err(|e| CoffeeDefectError::InvalidImage(e.to_string()))?;
        self.predict_image(&image)
    }

    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let image = load_rgb(path)?;
        self.predict_image(&image)
    }
}
