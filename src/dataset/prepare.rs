//! Dataset Preparation Module
//!
//! Splits a raw `raw/<class>/*` tree into `train/`, `val/` and `test/`
//! directories, stratified per class and reproducible from a seed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::is_image_file;
use crate::utils::error::{CoffeeDefectError, Result};

/// Names of the split directories, in the order they are filled
pub const SPLIT_NAMES: [&str; 3] = ["train", "val", "test"];

/// Configuration for the train/val/test split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub train_fraction: f64,
    pub val_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.6,
            val_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    /// Whatever train and val leave over
    pub fn test_fraction(&self) -> f64 {
        (1.0 - self.train_fraction - self.val_fraction).max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(CoffeeDefectError::Config(format!(
                "train fraction must be in (0, 1], got {}",
                self.train_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            return Err(CoffeeDefectError::Config(format!(
                "val fraction must be in [0, 1), got {}",
                self.val_fraction
            )));
        }
        if self.train_fraction + self.val_fraction > 1.0 + 1e-9 {
            return Err(CoffeeDefectError::Config(format!(
                "train + val fractions exceed 1.0 ({} + {})",
                self.train_fraction, self.val_fraction
            )));
        }
        Ok(())
    }

    /// Number of (train, val, test) images for a class of `n` images.
    ///
    /// Val and test round down, so train keeps at least one image whenever
    /// the class has any.
    pub fn allocate(&self, n: usize) -> (usize, usize, usize) {
        let n_val = (n as f64 * self.val_fraction + 1e-9).floor() as usize;
        let n_test = (n as f64 * self.test_fraction() + 1e-9).floor() as usize;
        let n_val = n_val.min(n.saturating_sub(1));
        let n_test = n_test.min(n.saturating_sub(1 + n_val));
        (n - n_val - n_test, n_val, n_test)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassSplit {
    pub total: usize,
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

/// Written to `<output>/split_summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSummary {
    pub config: SplitConfig,
    pub classes: BTreeMap<String, ClassSplit>,
    pub totals: ClassSplit,
}

/// Copy a stratified, seeded split of `raw_dir` into `output_dir`.
///
/// Existing `train/`, `val/` and `test/` directories under `output_dir` are
/// replaced so stale images never leak between runs.
pub fn prepare_splits(raw_dir: &Path, output_dir: &Path, config: &SplitConfig) -> Result<SplitSummary> {
    config.validate()?;
    info!("Preparing splits from {:?} into {:?}", raw_dir, output_dir);

    let class_images = discover_class_images(raw_dir)?;
    if class_images.is_empty() {
        return Err(CoffeeDefectError::Dataset(format!(
            "no class directories found in {:?}",
            raw_dir
        )));
    }

    for split in SPLIT_NAMES {
        let dir = output_dir.join(split);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut classes = BTreeMap::new();
    let mut totals = ClassSplit::default();

    for (class_name, mut images) in class_images {
        if images.is_empty() {
            warn!("Class '{}' has no images", class_name);
        }

        images.shuffle(&mut rng);
        let (n_train, n_val, n_test) = config.allocate(images.len());

        let parts = [
            &images[..n_train],
            &images[n_train..n_train + n_val],
            &images[n_train + n_val..],
        ];

        for (split, files) in SPLIT_NAMES.iter().zip(parts) {
            let class_dir = output_dir.join(split).join(&class_name);
            fs::create_dir_all(&class_dir)?;

            for src in files {
                let Some(file_name) = src.file_name() else {
                    continue;
                };
                fs::copy(src, class_dir.join(file_name))?;
            }
        }

        let stat = ClassSplit {
            total: images.len(),
            train: n_train,
            val: n_val,
            test: n_test,
        };
        println!(
            "  {:16} {:5} → train {:5} | val {:5} | test {:5}",
            class_name, stat.total, stat.train, stat.val, stat.test
        );

        totals.total += stat.total;
        totals.train += stat.train;
        totals.val += stat.val;
        totals.test += stat.test;
        classes.insert(class_name, stat);
    }

    let summary = SplitSummary {
        config: config.clone(),
        classes,
        totals,
    };

    fs::create_dir_all(output_dir)?;
    let summary_path = output_dir.join("split_summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    info!("Split summary saved to {:?}", summary_path);

    Ok(summary)
}

/// Map each class directory to its image files, both sorted
fn discover_class_images(raw_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    if !raw_dir.is_dir() {
        return Err(CoffeeDefectError::Dataset(format!(
            "raw directory does not exist: {:?}",
            raw_dir
        )));
    }

    let mut class_images = BTreeMap::new();
    for entry in fs::read_dir(raw_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(class_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };

        let mut images: Vec<PathBuf> = WalkDir::new(entry.path())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_image_file(p))
            .collect();
        images.sort();

        class_images.insert(class_name, images);
    }

    Ok(class_images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raw_tree(counts: &[(&str, usize)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (class, n) in counts {
            let class_dir = dir.path().join(class);
            fs::create_dir_all(&class_dir).unwrap();
            for i in 0..*n {
                fs::write(class_dir.join(format!("img_{i:03}.jpg")), b"jpeg bytes").unwrap();
            }
        }
        dir
    }

    fn count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|r| r.count()).unwrap_or(0)
    }

    #[test]
    fn test_allocate_default_fractions() {
        let config = SplitConfig::default();
        assert_eq!(config.allocate(10), (6, 2, 2));
        assert_eq!(config.allocate(1), (1, 0, 0));
        assert_eq!(config.allocate(0), (0, 0, 0));
        assert_eq!(config.allocate(7), (5, 1, 1));
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let bad = SplitConfig {
            train_fraction: 0.8,
            val_fraction: 0.3,
            seed: 1,
        };
        assert!(matches!(bad.validate(), Err(CoffeeDefectError::Config(_))));

        let zero_train = SplitConfig {
            train_fraction: 0.0,
            val_fraction: 0.5,
            seed: 1,
        };
        assert!(zero_train.validate().is_err());
    }

    #[test]
    fn test_prepare_splits_is_stratified() {
        let raw = raw_tree(&[("black", 10), ("sour", 5)]);
        let out = TempDir::new().unwrap();

        let summary = prepare_splits(raw.path(), out.path(), &SplitConfig::default()).unwrap();

        assert_eq!(summary.classes["black"], ClassSplit { total: 10, train: 6, val: 2, test: 2 });
        assert_eq!(summary.classes["sour"], ClassSplit { total: 5, train: 3, val: 1, test: 1 });
        assert_eq!(count(&out.path().join("train/black")), 6);
        assert_eq!(count(&out.path().join("test/sour")), 1);
        assert!(out.path().join("split_summary.json").exists());
    }

    #[test]
    fn test_prepare_splits_is_reproducible() {
        let raw = raw_tree(&[("cut", 9)]);
        let out_a = TempDir::new().unwrap();
        let out_b = TempDir::new().unwrap();
        let config = SplitConfig::default();

        prepare_splits(raw.path(), out_a.path(), &config).unwrap();
        prepare_splits(raw.path(), out_b.path(), &config).unwrap();

        let names = |root: &Path| {
            let mut v: Vec<_> = fs::read_dir(root.join("val/cut"))
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            v.sort();
            v
        };
        assert_eq!(names(out_a.path()), names(out_b.path()));
    }

    #[test]
    fn test_missing_raw_dir() {
        let out = TempDir::new().unwrap();
        let result = prepare_splits(&out.path().join("missing"), out.path(), &SplitConfig::default());
        assert!(matches!(result, Err(CoffeeDefectError::Dataset(_))));
    }
}
