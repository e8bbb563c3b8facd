//! Checkpoint naming, persistence and the sweep results file
//!
//! A checkpoint is two files sharing a stem:
//!
//! ```text
//! best_model_convnext_tiny_bs8_lr0.001_acc0.9312_20250114_093015.mpk
//! best_model_convnext_tiny_bs8_lr0.001_acc0.9312_20250114_093015.json
//! ```
//!
//! The `.mpk` file is the `CompactRecorder` record, the `.json` sidecar is
//! `CheckpointMetadata`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::trainer::TrainingHistory;
use crate::dataset::transform::{IMAGENET_MEAN, IMAGENET_STD};
use crate::dataset::validate_class_names;
use crate::model::{Architecture, CoffeeClassifier};
use crate::utils::error::{CoffeeDefectError, Result};

/// Extension the burn recorder writes
pub const RECORD_EXTENSION: &str = "mpk";
/// Extension of the metadata sidecar
pub const METADATA_EXTENSION: &str = "json";

const STEM_PREFIX: &str = "best_model_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Fields encoded in a checkpoint's file stem
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointName {
    pub architecture: Architecture,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub accuracy: f64,
    pub timestamp: NaiveDateTime,
}

impl CheckpointName {
    /// Name stamped with the current local time, truncated to seconds
    pub fn now(architecture: Architecture, batch_size: usize, learning_rate: f64, accuracy: f64) -> Self {
        let now = Local::now().naive_local();
        let timestamp =
            NaiveDateTime::parse_from_str(&now.format(TIMESTAMP_FORMAT).to_string(), TIMESTAMP_FORMAT)
                .unwrap_or(now);
        Self {
            architecture,
            batch_size,
            learning_rate,
            accuracy,
            timestamp,
        }
    }

    /// `best_model_<arch>_bs<batch>_lr<lr>_acc<acc:.4>_<YYYYmmdd_HHMMSS>`
    pub fn file_stem(&self) -> String {
        format!(
            "{}{}_bs{}_lr{}_acc{:.4}_{}",
            STEM_PREFIX,
            self.architecture,
            self.batch_size,
            self.learning_rate,
            self.accuracy,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    /// Parse a bare stem, a file name with a recorder or sidecar extension,
    /// or a full path.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |why: &str| CoffeeDefectError::Checkpoint(format!("invalid checkpoint name '{}': {}", name, why));

        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid("no file name"))?;
        let stem = strip_extension(file_name);

        let mut tail = stem.rsplitn(3, '_');
        let time = tail.next().ok_or_else(|| invalid("missing time"))?;
        let date = tail.next().ok_or_else(|| invalid("missing date"))?;
        let rest = tail.next().ok_or_else(|| invalid("missing fields"))?;

        let timestamp = NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), TIMESTAMP_FORMAT)
            .map_err(|e| invalid(&format!("bad timestamp: {}", e)))?;

        let (rest, accuracy) = rest.rsplit_once("_acc").ok_or_else(|| invalid("missing accuracy"))?;
        let (rest, learning_rate) = rest.rsplit_once("_lr").ok_or_else(|| invalid("missing learning rate"))?;
        let (arch, batch_size) = rest.rsplit_once("_bs").ok_or_else(|| invalid("missing batch size"))?;
        let arch = arch.strip_prefix(STEM_PREFIX).ok_or_else(|| invalid("missing best_model_ prefix"))?;

        Ok(Self {
            architecture: Architecture::from_str(arch)?,
            batch_size: batch_size.parse().map_err(|_| invalid("batch size is not an integer"))?,
            learning_rate: learning_rate.parse().map_err(|_| invalid("learning rate is not a number"))?,
            accuracy: accuracy.parse().map_err(|_| invalid("accuracy is not a number"))?,
            timestamp,
        })
    }
}

/// Drop a trailing alphabetic extension (`.mpk`, `.json`, `.pt`); the dots
/// inside learning rates and accuracies are left alone
fn strip_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphabetic()) => stem,
        _ => file_name,
    }
}

/// `<path>.<ext>` without touching dots already in the stem
fn with_appended_extension(stem_path: &Path, ext: &str) -> PathBuf {
    let mut s = stem_path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Sidecar describing how a checkpoint was produced and how to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub architecture: Architecture,
    pub class_names: Vec<String>,
    pub image_size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub epochs_run: usize,
    pub test_loss: f64,
    pub test_accuracy: f64,
    pub timestamp: String,
}

impl CheckpointMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        architecture: Architecture,
        class_names: Vec<String>,
        image_size: usize,
        batch_size: usize,
        learning_rate: f64,
        weight_decay: f64,
        epochs: usize,
        history: &TrainingHistory,
    ) -> Self {
        Self {
            architecture,
            class_names,
            image_size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            batch_size,
            learning_rate,
            weight_decay,
            epochs,
            epochs_run: history.epochs_run,
            test_loss: history.test_loss.unwrap_or(0.0),
            test_accuracy: history.test_acc.unwrap_or(0.0),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CoffeeDefectError::Checkpoint(format!("cannot read metadata {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| CoffeeDefectError::Checkpoint(format!("malformed metadata {:?}: {}", path, e)))
    }
}

/// Where the record and sidecar of a checkpoint path live.
///
/// Accepts the stem path or either file.
pub fn checkpoint_paths(path: &Path) -> (PathBuf, PathBuf) {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let stem_path = path.with_file_name(strip_extension(name));
    (
        with_appended_extension(&stem_path, RECORD_EXTENSION),
        with_appended_extension(&stem_path, METADATA_EXTENSION),
    )
}

/// Write the record and sidecar under `dir`; returns the record path
pub fn save_checkpoint<B: Backend>(
    model: &CoffeeClassifier<B>,
    dir: &Path,
    name: &CheckpointName,
    metadata: &CheckpointMetadata,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let stem_path = dir.join(name.file_stem());
    let (record_path, metadata_path) = checkpoint_paths(&stem_path);

    model
        .clone()
        .save_file(record_path.clone(), &CompactRecorder::new())
        .map_err(|e| CoffeeDefectError::Checkpoint(format!("failed to save model: {:?}", e)))?;
    fs::write(&metadata_path, serde_json::to_string_pretty(metadata)?)?;

    info!("Checkpoint saved to {:?}", record_path);
    Ok(record_path)
}

/// Rebuild the architecture named in the sidecar and load its parameters
pub fn load_checkpoint<B: Backend>(path: &Path, device: &B::Device) -> Result<(CoffeeClassifier<B>, CheckpointMetadata)> {
    let (record_path, metadata_path) = checkpoint_paths(path);
    if !record_path.exists() {
        return Err(CoffeeDefectError::Checkpoint(format!(
            "checkpoint not found: {:?}",
            record_path
        )));
    }

    let metadata = CheckpointMetadata::load(&metadata_path)?;
    validate_class_names(&metadata.class_names)
        .map_err(|e| CoffeeDefectError::Checkpoint(format!("class list mismatch: {}", e)))?;
    validate_normalization(&metadata)?;

    let model = CoffeeClassifier::new(metadata.architecture, metadata.class_names.len(), device)
        .load_file(record_path.clone(), &CompactRecorder::new(), device)
        .map_err(|e| CoffeeDefectError::Checkpoint(format!("failed to load {:?}: {:?}", record_path, e)))?;

    info!("Loaded {} checkpoint from {:?}", metadata.architecture, record_path);
    Ok((model, metadata))
}

/// The eval transform always normalizes with the ImageNet statistics.
fn validate_normalization(metadata: &CheckpointMetadata) -> Result<()> {
    let same = |a: &[f32; 3], b: &[f32; 3]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6);
    if same(&metadata.mean, &IMAGENET_MEAN) && same(&metadata.std, &IMAGENET_STD) {
        Ok(())
    } else {
        Err(CoffeeDefectError::Checkpoint(format!(
            "checkpoint normalization mean {:?} std {:?} differs from ImageNet mean {:?} std {:?}",
            metadata.mean, metadata.std, IMAGENET_MEAN, IMAGENET_STD
        )))
    }
}

/// `<arch>_bs<batch>_lr<lr>`
pub fn results_key(architecture: Architecture, batch_size: usize, learning_rate: f64) -> String {
    format!("{}_bs{}_lr{}", architecture, batch_size, learning_rate)
}

/// Outcome of one run of a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub model_name: Architecture,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub test_accuracy: f64,
    pub test_loss: f64,
    pub model_path: PathBuf,
    pub history: TrainingHistory,
    pub predictions: Vec<usize>,
    pub labels: Vec<usize>,
}

/// Results of a sweep, keyed by `results_key`
pub type RunResults = BTreeMap<String, RunResult>;

/// Write all run results as pretty JSON
pub fn save_results(results: &RunResults, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(results)?)?;
    info!("Results saved to {:?}", path);
    Ok(())
}
