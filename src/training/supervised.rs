//! Supervised transfer-learning runs
//!
//! Ties the pieces together for the CLI: scan and cache the three splits,
//! assemble the model, train, test, checkpoint, and collect the sweep
//! results.

use burn::data::dataset::Dataset;
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::info;

use super::checkpoint::{save_checkpoint, save_results, CheckpointMetadata, CheckpointName, RunResult, RunResults};
use super::trainer::ModelTrainer;
use super::{RunConfig, TrainingConfig};
use crate::dataset::{validate_class_names, CoffeeBeanBurnDataset, CoffeeDefectDataset};
use crate::utils::error::{CoffeeDefectError, Result};

/// The three cached splits of a prepared dataset
#[derive(Debug, Clone)]
pub struct PreparedSplits {
    pub class_names: Vec<String>,
    pub train: CoffeeBeanBurnDataset,
    pub val: CoffeeBeanBurnDataset,
    pub test: CoffeeBeanBurnDataset,
}

impl PreparedSplits {
    /// Scan and cache `train_dir`, `val_dir` and `test_dir`.
    ///
    /// Every split must carry exactly the registered class directories.
    pub fn load(config: &TrainingConfig) -> Result<Self> {
        let mut cached = Vec::with_capacity(3);
        let mut class_names = Vec::new();

        for (split, dir) in [
            ("train", &config.train_dir),
            ("val", &config.val_dir),
            ("test", &config.test_dir),
        ] {
            println!("{}", format!("Loading {} split from {:?}...", split, dir).cyan());
            let scanned = CoffeeDefectDataset::new(dir)?;
            validate_class_names(&scanned.class_names)
                .map_err(|e| CoffeeDefectError::Dataset(format!("{} split: {}", split, e)))?;
            scanned.get_stats().print();

            class_names = scanned.class_names.clone();
            cached.push(CoffeeBeanBurnDataset::from_loader(&scanned, config.image_size)?);
        }

        let test = cached.pop();
        let val = cached.pop();
        let train = cached.pop();
        match (train, val, test) {
            (Some(train), Some(val), Some(test)) => Ok(Self {
                class_names,
                train,
                val,
                test,
            }),
            _ => Err(CoffeeDefectError::Dataset("missing dataset split".into())),
        }
    }
}

/// Train, test and checkpoint one configuration on already cached splits
pub fn train_on_splits<B: AutodiffBackend>(
    config: &TrainingConfig,
    run: &RunConfig,
    splits: &PreparedSplits,
    device: &B::Device,
) -> Result<RunResult> {
    run.validate()?;

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  🧠 Architecture:      {}", run.architecture);
    println!("  🏷️  Training samples:  {}", splits.train.len());
    println!("  ✅ Validation samples: {}", splits.val.len());
    println!("  🧪 Test samples:      {}", splits.test.len());
    println!("  🔄 Epochs:            {}", run.epochs);
    println!("  📦 Batch size:        {}", run.batch_size);
    println!("  📈 Learning rate:     {}", run.learning_rate);
    println!("  ⚖️  Weight decay:      {}", run.weight_decay);
    println!("  🧊 Frozen backbone:   {}", run.freeze_backbone);
    println!();

    let model = run.model_config().init::<B>(device)?;

    let mut trainer = ModelTrainer::new(
        model,
        splits.train.clone(),
        splits.val.clone(),
        run.batch_size,
        run.seed,
        device.clone(),
    )?
    .with_test_set(splits.test.clone())
    .with_patience(run.patience);

    println!("{}", "Starting Training...".green().bold());
    trainer.train(run.epochs, run.learning_rate, run.weight_decay);
    let evaluation = trainer.test()?;
    let history = trainer.history().clone();

    let name = CheckpointName::now(run.architecture, run.batch_size, run.learning_rate, evaluation.accuracy);
    let metadata = CheckpointMetadata::new(
        run.architecture,
        splits.class_names.clone(),
        config.image_size,
        run.batch_size,
        run.learning_rate,
        run.weight_decay,
        run.epochs,
        &history,
    );

    println!("{}", "Saving Model...".cyan());
    let model_path = save_checkpoint(trainer.model(), &config.models_dir, &name, &metadata)?;
    println!("  💾 Saved to: {:?}", model_path);
    println!("  🎯 Test Accuracy: {:.4}", evaluation.accuracy);
    println!("  📉 Test Loss: {:.4}", evaluation.loss);

    Ok(RunResult {
        model_name: run.architecture,
        batch_size: run.batch_size,
        learning_rate: run.learning_rate,
        weight_decay: run.weight_decay,
        epochs: run.epochs,
        test_accuracy: evaluation.accuracy,
        test_loss: evaluation.loss,
        model_path,
        history,
        predictions: evaluation.predictions,
        labels: evaluation.labels,
    })
}

/// Load the splits and run a single configuration
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    run: &RunConfig,
    device: &B::Device,
) -> Result<RunResult> {
    let splits = PreparedSplits::load(config)?;
    train_on_splits::<B>(config, run, &splits, device)
}

/// Run every configuration in `config.runs` against one cached copy of the
/// data and write `training_results.json`.
pub fn run_sweep<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<RunResults> {
    config.validate()?;
    let splits = PreparedSplits::load(config)?;

    let total = config.runs.len();
    let mut results = RunResults::new();

    for (idx, run) in config.runs.iter().enumerate() {
        println!();
        println!(
            "{}",
            format!(
                "[{}/{}] Training: {} | BS={} | LR={} | WD={}",
                idx + 1,
                total,
                run.architecture,
                run.batch_size,
                run.learning_rate,
                run.weight_decay
            )
            .yellow()
            .bold()
        );

        let result = train_on_splits::<B>(config, run, &splits, device)?;
        results.insert(run.results_key(), result);
        save_results(&results, &config.results_path())?;
    }

    info!("All {} runs finished", total);
    println!();
    println!("{}", format!("All {} models trained successfully!", total).green().bold());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CLASS_NAMES;
    use crate::model::Architecture;
    use crate::training::load_checkpoint;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use std::path::Path;
    use tempfile::TempDir;

    type AB = Autodiff<NdArray<f32>>;

    fn write_split(root: &Path, per_class: usize) {
        for (label, class) in CLASS_NAMES.iter().enumerate() {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let shade = (label * 13 + i * 7) as u8;
                ImageBuffer::from_pixel(16, 16, Rgb([shade, 255 - shade, 60]))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_split_with_missing_class_is_rejected() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("processed");
        write_split(&data.join("train"), 1);
        write_split(&data.join("val"), 1);
        write_split(&data.join("test"), 1);
        std::fs::remove_dir_all(data.join("test").join("sour")).unwrap();

        let config = TrainingConfig::from_data_dir(&data).with_image_size(16);
        let err = PreparedSplits::load(&config).unwrap_err();
        assert!(matches!(err, CoffeeDefectError::Dataset(_)));
    }

    #[test]
    fn test_sweep_writes_checkpoint_and_results() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("processed");
        write_split(&data.join("train"), 1);
        write_split(&data.join("val"), 1);
        write_split(&data.join("test"), 1);

        let run = RunConfig {
            architecture: Architecture::MobileNetV3,
            batch_size: 17,
            epochs: 1,
            ..Default::default()
        };
        let config = TrainingConfig::from_data_dir(&data)
            .with_models_dir(dir.path().join("models"))
            .with_image_size(16)
            .with_runs(vec![run.clone()]);

        let device = Default::default();
        let results = run_sweep::<AB>(&config, &device).unwrap();

        let result = &results["mobilenet_v3_bs17_lr0.001"];
        assert_eq!(result.labels.len(), CLASS_NAMES.len());
        assert_eq!(result.history.epochs_run, 1);
        assert!(result.model_path.exists());
        assert!(config.results_path().exists());

        let name = CheckpointName::parse(result.model_path.to_str().unwrap()).unwrap();
        assert_eq!(name.architecture, Architecture::MobileNetV3);
        assert_eq!(name.batch_size, 17);

        let (model, metadata) = load_checkpoint::<NdArray<f32>>(&result.model_path, &device).unwrap();
        assert_eq!(model.num_classes(), CLASS_NAMES.len());
        assert_eq!(metadata.image_size, 16);
    }
}
