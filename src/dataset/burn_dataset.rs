//! Burn Dataset Integration for coffee bean images
//!
//! Images are decoded and resized once, then cached. Clean items come from
//! `Dataset::get`; training pulls augmented items through `get_augmented`
//! with the epoch RNG so a run is reproducible from its seed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use super::augmentation::Augmenter;
use super::loader::{load_rgb, CoffeeDefectDataset};
use super::transform::{normalize, resize_to, to_chw};
use crate::utils::error::Result;

/// A single item ready for batching
#[derive(Clone, Debug)]
pub struct CoffeeBeanItem {
    /// Image data as flattened CHW float array in [0, 1]
    pub image: Vec<f32>,
    pub label: usize,
    pub path: String,
}

#[derive(Clone)]
struct CachedImage {
    image: DynamicImage,
    label: usize,
    path: PathBuf,
}

/// Dataset of pre-resized images implementing Burn's `Dataset` trait
#[derive(Clone)]
pub struct CoffeeBeanBurnDataset {
    items: Vec<CachedImage>,
    image_size: usize,
}

impl std::fmt::Debug for CoffeeBeanBurnDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoffeeBeanBurnDataset")
            .field("len", &self.items.len())
            .field("image_size", &self.image_size)
            .finish()
    }
}

impl CoffeeBeanBurnDataset {
    /// Load and resize every sample in parallel.
    ///
    /// Any image that fails to decode aborts the load with its path.
    pub fn new_cached(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Result<Self> {
        let total = samples.len();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let items = samples
            .par_iter()
            .map(|(path, label)| -> Result<CachedImage> {
                let image = resize_to(load_rgb(path)?, image_size);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                Ok(CachedImage {
                    image,
                    label: *label,
                    path: path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>();

        pb.finish_and_clear();
        let items = items?;
        info!("Cached {} images at {}x{}", items.len(), image_size, image_size);

        Ok(Self { items, image_size })
    }

    /// Cache every sample of a scanned split
    pub fn from_loader(loader: &CoffeeDefectDataset, image_size: usize) -> Result<Self> {
        Self::new_cached(loader.pairs(), image_size)
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// Training-transform view of item `index`
    pub fn get_augmented(
        &self,
        index: usize,
        augmenter: &Augmenter,
        rng: &mut ChaCha8Rng,
    ) -> Option<CoffeeBeanItem> {
        let cached = self.items.get(index)?;
        let image = augmenter.augment(cached.image.clone(), rng);
        Some(CoffeeBeanItem {
            image: to_chw(&image),
            label: cached.label,
            path: cached.path.to_string_lossy().to_string(),
        })
    }
}

impl Dataset<CoffeeBeanItem> for CoffeeBeanBurnDataset {
    fn get(&self, index: usize) -> Option<CoffeeBeanItem> {
        self.items.get(index).map(|cached| CoffeeBeanItem {
            image: to_chw(&cached.image),
            label: cached.label,
            path: cached.path.to_string_lossy().to_string(),
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images with shape [batch_size, 3, height, width]
#[derive(Clone, Debug)]
pub struct CoffeeBeanBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items and applies ImageNet normalization
#[derive(Clone, Debug)]
pub struct CoffeeBeanBatcher {
    image_size: usize,
}

impl CoffeeBeanBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, CoffeeBeanItem, CoffeeBeanBatch<B>> for CoffeeBeanBatcher {
    fn batch(&self, items: Vec<CoffeeBeanItem>, device: &B::Device) -> CoffeeBeanBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images =
            Tensor::<B, 4>::from_floats(TensorData::new(images_data, [batch_size, 3, size, size]), device);
        let images = normalize(images, device);

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        CoffeeBeanBatch { images, targets }
    }
}
