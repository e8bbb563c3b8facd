//! Coffee Defect Dataset Loader
//!
//! Scans a directory-per-class tree into labeled samples. Labels follow the
//! sorted order of the class directory names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::is_image_file;
use crate::utils::error::{CoffeeDefectError, Result};

/// A single image sample with its label and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
    /// Class name (the containing directory)
    pub class_name: String,
    /// Unique sample ID within the dataset
    pub id: usize,
}

/// One split (train, val or test) of the defect dataset
#[derive(Debug, Clone)]
pub struct CoffeeDefectDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<ImageSample>,
    /// Class directory names in label order
    pub class_names: Vec<String>,
}

impl CoffeeDefectDataset {
    /// Create a dataset from a directory
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── black/
    /// │   ├── bean_001.jpg
    /// │   └── bean_002.png
    /// ├── broken/
    /// │   └── ...
    /// └── ...
    /// ```
    ///
    /// Class directories without images contribute no samples.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading dataset from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(CoffeeDefectError::Dataset(format!(
                "dataset directory does not exist: {:?}",
                root_dir
            )));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut files: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, files.len());

            for path in files {
                let id = samples.len();
                samples.push(ImageSample {
                    path,
                    label,
                    class_name: class_name.clone(),
                    id,
                });
            }
        }

        info!(
            "Loaded {} samples across {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Image paths in sample order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.samples.iter().map(|s| s.path.clone()).collect()
    }

    /// Labels in sample order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// (path, label) pairs for the burn dataset
    pub fn pairs(&self) -> Vec<(PathBuf, usize)> {
        self.samples.iter().map(|s| (s.path.clone(), s.label)).collect()
    }

    /// Load an image from disk as 3-channel RGB
    pub fn load_image(&self, sample: &ImageSample) -> Result<DynamicImage> {
        load_rgb(&sample.path)
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes: self.num_classes(),
            class_counts,
            class_names: self
                .class_names
                .iter()
                .enumerate()
                .map(|(idx, name)| (idx, name.clone()))
                .collect(),
        }
    }
}

/// Open and decode an image file, converting it to RGB8
pub fn load_rgb(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .map_err(|e| CoffeeDefectError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| CoffeeDefectError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| CoffeeDefectError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
    pub class_names: HashMap<usize, String>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class:");

        let mut sorted: Vec<_> = self.class_names.iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);

        for (idx, name) in sorted {
            let count = self.class_counts[*idx];
            let bar_len = if self.total_samples > 0 {
                (count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            println!("    {:3}. {:16} {:5} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn write_image(path: &Path) {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 8, Rgb([120, 80, 40]));
        img.save(path).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        for class in ["sour", "black", "mold"] {
            std::fs::create_dir_all(dir.path().join(class)).unwrap();
        }
        write_image(&dir.path().join("black/a.png"));
        write_image(&dir.path().join("black/b.jpg"));
        write_image(&dir.path().join("sour/c.PNG"));
        std::fs::write(dir.path().join("sour/readme.txt"), "not an image").unwrap();
        // mold stays empty
        dir
    }

    #[test]
    fn test_labels_follow_sorted_directories() {
        let dir = fixture();
        let dataset = CoffeeDefectDataset::new(dir.path()).unwrap();

        assert_eq!(dataset.class_names, vec!["black", "mold", "sour"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels(), vec![0, 0, 2]);
    }

    #[test]
    fn test_paths_and_labels_are_parallel_and_in_range() {
        let dir = fixture();
        let dataset = CoffeeDefectDataset::new(dir.path()).unwrap();

        let paths = dataset.paths();
        let labels = dataset.labels();
        assert_eq!(paths.len(), labels.len());
        assert!(labels.iter().all(|&l| l < dataset.num_classes()));
    }

    #[test]
    fn test_empty_class_is_silent() {
        let dir = fixture();
        let dataset = CoffeeDefectDataset::new(dir.path()).unwrap();
        let stats = dataset.get_stats();
        assert_eq!(stats.class_counts, vec![2, 0, 1]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = CoffeeDefectDataset::new(dir.path().join("nope"));
        assert!(matches!(result, Err(CoffeeDefectError::Dataset(_))));
    }

    #[test]
    fn test_load_image_is_rgb() {
        let dir = fixture();
        let dataset = CoffeeDefectDataset::new(dir.path()).unwrap();
        let img = dataset.load_image(&dataset.samples[0]).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_corrupt_image_fails_on_load() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("cut")).unwrap();
        std::fs::write(dir.path().join("cut/broken.jpg"), b"definitely not a jpeg").unwrap();

        let dataset = CoffeeDefectDataset::new(dir.path()).unwrap();
        assert_eq!(dataset.len(), 1);
        let err = dataset.load_image(&dataset.samples[0]).unwrap_err();
        assert!(matches!(err, CoffeeDefectError::ImageLoad(_, _)));
    }
}
