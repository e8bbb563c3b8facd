//! Dataset module for coffee bean defect images
//!
//! This module provides:
//! - Class registry shared by training and serving
//! - Directory scanning into labeled samples (`loader`)
//! - Train-time augmentation and the deterministic evaluation transform
//! - Burn `Dataset`/`Batcher` integration
//! - Stratified train/val/test preparation from a raw directory tree
//!
//! ## Directory layout
//!
//! ```text
//! data/processed/train/
//! ├── black/
//! │   ├── IMG_0001.jpg
//! │   └── ...
//! ├── broken/
//! └── ...
//! ```

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod prepare;
pub mod transform;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{CoffeeBeanBatch, CoffeeBeanBatcher, CoffeeBeanBurnDataset, CoffeeBeanItem};
pub use loader::{CoffeeDefectDataset, DatasetStats, ImageSample};
pub use prepare::{prepare_splits, SplitConfig, SplitSummary};

use crate::utils::error::{CoffeeDefectError, Result};

/// Number of defect categories
pub const NUM_CLASSES: usize = 17;

/// File extensions picked up by the loader (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Defect categories in label order.
///
/// Labels are assigned by sorting class directory names, so this list is kept
/// in lexicographic order.
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "black",
    "broken",
    "cut",
    "floater",
    "foreign_matter",
    "fungus",
    "healthy",
    "immature",
    "insect_damage",
    "mild_damage",
    "mold",
    "overfermented",
    "severe_damage",
    "shell",
    "shrivelled",
    "sour",
    "stones",
];

/// Get the class name for a given label index
pub fn class_name(label: usize) -> Option<&'static str> {
    CLASS_NAMES.get(label).copied()
}

/// Get the label index for a given class name
pub fn class_index(name: &str) -> Option<usize> {
    CLASS_NAMES.iter().position(|&n| n == name)
}

/// Check that a class list matches the registry exactly, order included
pub fn validate_class_names<S: AsRef<str>>(names: &[S]) -> Result<()> {
    if names.len() != NUM_CLASSES {
        return Err(CoffeeDefectError::Dataset(format!(
            "expected {} classes, found {}",
            NUM_CLASSES,
            names.len()
        )));
    }

    for (idx, (found, expected)) in names.iter().zip(CLASS_NAMES.iter()).enumerate() {
        if found.as_ref() != *expected {
            return Err(CoffeeDefectError::Dataset(format!(
                "class {} is '{}', expected '{}'",
                idx,
                found.as_ref(),
                expected
            )));
        }
    }

    Ok(())
}

/// Whether a path has one of the recognized image extensions
pub fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_class_names_are_sorted_and_unique() {
        let mut sorted = CLASS_NAMES.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, CLASS_NAMES.to_vec());
    }

    #[test]
    fn test_class_name_and_index() {
        assert_eq!(class_name(0), Some("black"));
        assert_eq!(class_name(16), Some("stones"));
        assert_eq!(class_name(17), None);
        assert_eq!(class_index("healthy"), Some(6));
        assert_eq!(class_index("quaker"), None);
    }

    #[test]
    fn test_validate_class_names() {
        let names: Vec<String> = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        assert!(validate_class_names(&names).is_ok());

        let mut swapped = names.clone();
        swapped.swap(0, 1);
        assert!(validate_class_names(&swapped).is_err());

        assert!(validate_class_names(&names[..16]).is_err());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("beans/IMG_01.JPG")));
        assert!(is_image_file(Path::new("beans/a.jpeg")));
        assert!(is_image_file(Path::new("beans/a.png")));
        assert!(!is_image_file(Path::new("beans/a.bmp")));
        assert!(!is_image_file(Path::new("beans/notes")));
    }
}
