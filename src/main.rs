//! Coffee Bean Defect Classification CLI
//!
//! Entry point for preparing splits, training sweeps, evaluating checkpoints
//! and running one-off predictions.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use coffee_defect::backend::{backend_name, default_device, InferenceBackend, TrainingBackend};
use coffee_defect::dataset::{is_image_file, prepare_splits, SplitConfig, CLASS_NAMES};
use coffee_defect::inference::{top_k, Predictor};
use coffee_defect::model::Architecture;
use coffee_defect::training::{evaluate, load_checkpoint, run_sweep, RunConfig, TrainingConfig};
use coffee_defect::utils::format_duration;
use coffee_defect::utils::logging::{init_logging, LogConfig};
use coffee_defect::utils::metrics::Metrics;
use coffee_defect::{CoffeeBeanBatcher, CoffeeBeanBurnDataset, CoffeeDefectDataset};

/// Coffee Bean Defect Classification
///
/// Transfer learning on ImageNet backbones for 17 green coffee bean defect
/// classes, using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "coffee_defect")]
#[command(version)]
#[command(about = "Coffee bean defect classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a raw class-per-directory tree into train/val/test
    Prepare {
        /// Raw images, one directory per class
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,

        /// Where train/, val/ and test/ are written
        #[arg(long, default_value = "data/processed")]
        output_dir: PathBuf,

        /// Fraction of each class used for training
        #[arg(long, default_value = "0.6")]
        train: f64,

        /// Fraction of each class used for validation
        #[arg(long, default_value = "0.2")]
        val: f64,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Train one configuration, or a sweep from a JSON file
    Train {
        /// Directory holding train/, val/ and test/
        #[arg(short, long, default_value = "data/processed")]
        data_dir: PathBuf,

        /// Backbone (resnet50, efficientnet_b0, efficientnet_b2, mobilenet_v3, convnext_tiny)
        #[arg(short, long, default_value = "convnext_tiny")]
        arch: Architecture,

        /// Batch size for training
        #[arg(short, long, default_value = "8")]
        batch_size: usize,

        /// Learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Maximum number of training epochs
        #[arg(short, long, default_value = "20")]
        epochs: usize,

        /// Adam weight decay
        #[arg(long, default_value = "0.0001")]
        weight_decay: f64,

        /// Epochs without validation improvement before stopping
        #[arg(long, default_value = "5")]
        patience: usize,

        /// Train the whole network instead of only the head
        #[arg(long, default_value = "false")]
        no_freeze: bool,

        /// Burn record with ImageNet weights for the backbone
        #[arg(long)]
        pretrained: Option<PathBuf>,

        /// Output directory for checkpoints and training_results.json
        #[arg(short, long, default_value = "models")]
        models_dir: PathBuf,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// JSON list of run configurations; overrides the single-run flags
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Evaluate a checkpoint on a labeled directory
    Evaluate {
        /// Checkpoint (.mpk) written by training
        #[arg(short, long)]
        model: PathBuf,

        /// Labeled split, one directory per class
        #[arg(short, long, default_value = "data/processed/test")]
        data_dir: PathBuf,

        /// Batch size for evaluation
        #[arg(short, long, default_value = "16")]
        batch_size: usize,
    },

    /// Run inference on a single image or directory
    Infer {
        /// Path to input image or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Checkpoint (.mpk) written by training
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Show dataset statistics
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/processed/train")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Prepare {
            raw_dir,
            output_dir,
            train,
            val,
            seed,
        } => cmd_prepare(&raw_dir, &output_dir, train, val, seed),
        Commands::Train {
            data_dir,
            arch,
            batch_size,
            learning_rate,
            epochs,
            weight_decay,
            patience,
            no_freeze,
            pretrained,
            models_dir,
            seed,
            config,
        } => {
            let runs = match config {
                Some(path) => TrainingConfig::load_runs(&path)
                    .with_context(|| format!("Failed to read run configurations from {:?}", path))?,
                None => vec![RunConfig {
                    architecture: arch,
                    batch_size,
                    learning_rate,
                    epochs,
                    weight_decay,
                    patience,
                    freeze_backbone: !no_freeze,
                    pretrained_weights: pretrained,
                    seed,
                }],
            };
            let config = TrainingConfig::from_data_dir(&data_dir)
                .with_models_dir(models_dir)
                .with_runs(runs);
            cmd_train(&config)
        }
        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
        } => cmd_evaluate(&model, &data_dir, batch_size),
        Commands::Infer { input, model } => cmd_infer(&input, &model),
        Commands::Stats { data_dir } => cmd_stats(&data_dir),
    }
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════════╗
 ║   ☕ Coffee Bean Defect Classification                           ║
 ║   Transfer Learning with Burn + Rust                             ║
 ╚══════════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_prepare(raw_dir: &Path, output_dir: &Path, train: f64, val: f64, seed: u64) -> Result<()> {
    let config = SplitConfig {
        train_fraction: train,
        val_fraction: val,
        seed,
    };

    println!("{}", "Preparing Dataset Splits...".cyan().bold());
    println!("  📂 Raw images: {:?}", raw_dir);
    println!("  📁 Output:     {:?}", output_dir);
    println!(
        "  ✂️  Split:      {:.0}% / {:.0}% / {:.0}%",
        100.0 * config.train_fraction,
        100.0 * config.val_fraction,
        100.0 * config.test_fraction()
    );
    println!();

    let summary = prepare_splits(raw_dir, output_dir, &config).context("Failed to prepare splits")?;

    println!("{}", "Class Distribution:".cyan().bold());
    println!("  {:16} {:>6} {:>6} {:>6} {:>6}", "class", "total", "train", "val", "test");
    for (class, split) in &summary.classes {
        println!(
            "  {:16} {:>6} {:>6} {:>6} {:>6}",
            class, split.total, split.train, split.val, split.test
        );
    }
    println!(
        "  {:16} {:>6} {:>6} {:>6} {:>6}",
        "total".bold(),
        summary.totals.total,
        summary.totals.train,
        summary.totals.val,
        summary.totals.test
    );
    println!();
    println!("{}", "Splits ready!".green().bold());
    Ok(())
}

fn cmd_train(config: &TrainingConfig) -> Result<()> {
    println!("{}", "Initializing Training...".green().bold());
    println!("  🖥️  Backend: {}", backend_name());
    println!("  📂 Data:    {:?}", config.train_dir.parent().unwrap_or(Path::new(".")));
    println!("  🔁 Runs:    {}", config.runs.len());
    println!();

    let start = Instant::now();
    let device = default_device();
    let results = run_sweep::<TrainingBackend>(config, &device).context("Training failed")?;

    for (key, result) in &results {
        println!();
        println!("{}", format!("Classification Report: {}", key).cyan().bold());
        let metrics = Metrics::from_predictions(&result.predictions, &result.labels, CLASS_NAMES.len())
            .with_class_names(&CLASS_NAMES[..]);
        println!("{}", metrics.report());
    }

    if let Some((key, best)) = results
        .iter()
        .max_by(|a, b| a.1.test_accuracy.total_cmp(&b.1.test_accuracy))
    {
        println!("{}", "Best Run:".green().bold());
        println!("  🏆 {} with test accuracy {:.4}", key, best.test_accuracy);
        println!("  💾 {:?}", best.model_path);
    }
    println!("  ⏱️  Total time: {}", format_duration(start.elapsed().as_secs_f64()));
    println!("  📄 Results: {:?}", config.results_path());
    println!();

    println!("{}", "Next steps:".cyan().bold());
    println!("  • Evaluate: coffee_defect evaluate --model <checkpoint.mpk>");
    println!("  • Serve:    coffee-defect-server --model <checkpoint.mpk>");
    Ok(())
}

fn cmd_evaluate(model_path: &Path, data_dir: &Path, batch_size: usize) -> Result<()> {
    info!("Evaluating {:?} on {:?}", model_path, data_dir);

    let device = default_device();
    let (model, metadata) = load_checkpoint::<InferenceBackend>(model_path, &device)
        .with_context(|| format!("Failed to load checkpoint {:?}", model_path))?;

    println!("{}", "Evaluation Configuration:".cyan().bold());
    println!("  🧠 Model:   {} ({:?})", metadata.architecture, model_path);
    println!("  📂 Data:    {:?}", data_dir);
    println!("  🖥️  Backend: {}", backend_name());
    println!();

    let scanned = CoffeeDefectDataset::new(data_dir)?;
    coffee_defect::dataset::validate_class_names(&scanned.class_names)?;
    let dataset = CoffeeBeanBurnDataset::from_loader(&scanned, metadata.image_size)?;
    let batcher = CoffeeBeanBatcher::new(metadata.image_size);

    let start = Instant::now();
    let output = evaluate(&model, &dataset, &batcher, batch_size, &device);

    println!("  🎯 Accuracy: {:.4}", output.accuracy);
    println!("  📉 Loss:     {:.4}", output.loss);
    println!("  ⏱️  Time:     {}", format_duration(start.elapsed().as_secs_f64()));
    println!();

    let metrics = Metrics::from_predictions(&output.predictions, &output.labels, CLASS_NAMES.len())
        .with_class_names(&metadata.class_names);
    println!("{}", metrics.report());
    println!(
        "{}",
        metrics.confusion_matrix.display(Some(&metadata.class_names[..]))
    );
    Ok(())
}

fn cmd_infer(input: &Path, model_path: &Path) -> Result<()> {
    if !input.exists() {
        bail!("Input path not found: {:?}", input);
    }

    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  📷 Input:   {:?}", input);
    println!("  🧠 Model:   {:?}", model_path);
    println!("  🖥️  Backend: {}", backend_name());
    println!();

    println!("{}", "Loading model...".cyan());
    let predictor = Predictor::<InferenceBackend>::load(model_path, default_device())
        .with_context(|| format!("Failed to load checkpoint {:?}", model_path))?;

    let files: Vec<PathBuf> = if input.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        files
    } else {
        vec![input.to_path_buf()]
    };

    println!("{}", "Running inference...".cyan());
    println!();

    for file in &files {
        let image = match coffee_defect::dataset::loader::load_rgb(file) {
            Ok(image) => image,
            Err(e) => {
                println!("  {} {}", "Skipped:".yellow(), e);
                continue;
            }
        };

        let start = Instant::now();
        let probabilities = predictor.probabilities(&image)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        println!(
            "  📷 {}",
            file.file_name().and_then(|n| n.to_str()).unwrap_or("?").bold()
        );
        for (rank, (_, name, p)) in top_k(&probabilities, 3).into_iter().enumerate() {
            let line = format!("     {}. {:16} {:>6.2}%", rank + 1, name, 100.0 * p);
            if rank == 0 {
                println!("{}", line.green());
            } else {
                println!("{}", line);
            }
        }
        println!("     ⏱️  {:.1} ms", elapsed_ms);
    }

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    if !data_dir.exists() {
        bail!("Dataset directory not found: {:?}", data_dir);
    }

    let dataset = CoffeeDefectDataset::new(data_dir)?;
    let stats = dataset.get_stats();

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  📊 Total samples: {}", stats.total_samples);
    println!("  🏷️  Number of classes: {}", stats.num_classes);
    println!();

    println!("{}", "Class Distribution:".cyan().bold());
    for (idx, count) in stats.class_counts.iter().enumerate() {
        let class_name = stats.class_names.get(&idx).map(|s| s.as_str()).unwrap_or("Unknown");
        let pct = if stats.total_samples > 0 {
            100.0 * *count as f64 / stats.total_samples as f64
        } else {
            0.0
        };
        println!("  {:20} {:>5} ({:>5.1}%)", class_name, count, pct);
    }

    if let Err(e) = coffee_defect::dataset::validate_class_names(&dataset.class_names) {
        println!();
        println!("{} {}", "Warning:".yellow(), e);
    }
    Ok(())
}
