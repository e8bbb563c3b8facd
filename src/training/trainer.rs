//! Training Loop Implementation
//!
//! A custom loop over cached images rather than burn's `Learner`: epochs are
//! shuffled with a seeded ChaCha8 RNG, batches are built lazily from augmented
//! items, and validation runs on the inner backend through `model.valid()`.

use std::fmt;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::early_stopping::EarlyStopping;
use super::evaluation::{argmax_rows, count_correct, evaluate, EvaluationOutput};
use crate::dataset::{Augmenter, CoffeeBeanBatcher, CoffeeBeanBurnDataset};
use crate::model::CoffeeClassifier;
use crate::utils::error::{CoffeeDefectError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{AccuracyTracker, RunningAverage};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    EpochTraining,
    EpochValidating,
    EarlyStopped,
    Completed,
}

impl TrainingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingPhase::EarlyStopped | TrainingPhase::Completed)
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingPhase::EpochTraining => "training",
            TrainingPhase::EpochValidating => "validating",
            TrainingPhase::EarlyStopped => "early stopped",
            TrainingPhase::Completed => "completed",
        };
        write!(f, "{}", name)
    }
}

/// Per-epoch curves plus the final test numbers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub train_acc: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_acc: Vec<f64>,
    pub test_loss: Option<f64>,
    pub test_acc: Option<f64>,
    pub stopped_early: bool,
    pub epochs_run: usize,
    pub best_val_acc: f64,
}

impl TrainingHistory {
    fn record_epoch(&mut self, train_loss: f64, train_acc: f64, val_loss: f64, val_acc: f64) {
        self.train_loss.push(train_loss);
        self.train_acc.push(train_acc);
        self.val_loss.push(val_loss);
        self.val_acc.push(val_acc);
        self.epochs_run = self.train_loss.len();
    }
}

/// Owns everything a run needs and drives it from start to a terminal phase
pub struct ModelTrainer<B: AutodiffBackend> {
    model: CoffeeClassifier<B>,
    train_set: CoffeeBeanBurnDataset,
    val_set: CoffeeBeanBurnDataset,
    test_set: Option<CoffeeBeanBurnDataset>,
    batcher: CoffeeBeanBatcher,
    augmenter: Augmenter,
    batch_size: usize,
    patience: usize,
    device: B::Device,
    rng: ChaCha8Rng,
    phase: TrainingPhase,
    history: TrainingHistory,
}

impl<B: AutodiffBackend> ModelTrainer<B> {
    pub fn new(
        model: CoffeeClassifier<B>,
        train_set: CoffeeBeanBurnDataset,
        val_set: CoffeeBeanBurnDataset,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(CoffeeDefectError::Config("batch_size must be positive".into()));
        }
        if train_set.is_empty() {
            return Err(CoffeeDefectError::Training("training split is empty".into()));
        }

        let image_size = train_set.image_size();
        Ok(Self {
            model,
            train_set,
            val_set,
            test_set: None,
            batcher: CoffeeBeanBatcher::new(image_size),
            augmenter: Augmenter::with_defaults(image_size as u32),
            batch_size,
            patience: super::early_stopping::DEFAULT_PATIENCE,
            device,
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: TrainingPhase::EpochTraining,
            history: TrainingHistory::default(),
        })
    }

    pub fn with_test_set(mut self, test_set: CoffeeBeanBurnDataset) -> Self {
        self.test_set = Some(test_set);
        self
    }

    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = augmenter;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn model(&self) -> &CoffeeClassifier<B> {
        &self.model
    }

    pub fn into_model(self) -> CoffeeClassifier<B> {
        self.model
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// One pass over the shuffled training split. Returns (mean loss, accuracy).
    pub fn train_epoch<O>(&mut self, optimizer: &mut O, learning_rate: f64) -> (f64, f64)
    where
        O: Optimizer<CoffeeClassifier<B>, B>,
    {
        self.phase = TrainingPhase::EpochTraining;

        let mut indices: Vec<usize> = (0..self.train_set.len()).collect();
        indices.shuffle(&mut self.rng);
        let num_batches = indices.len().div_ceil(self.batch_size);

        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} batches {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut epoch_loss = RunningAverage::new();
        let mut accuracy = AccuracyTracker::new();

        for chunk in indices.chunks(self.batch_size) {
            let items: Vec<_> = chunk
                .iter()
                .filter_map(|&i| self.train_set.get_augmented(i, &self.augmenter, &mut self.rng))
                .collect();
            if items.is_empty() {
                continue;
            }

            let batch = self.batcher.batch(items, &self.device);
            let batch_len = batch.targets.dims()[0];

            let output = self.model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss.add(loss_value);
            accuracy.add_counts(count_correct(argmax_rows(output), batch.targets), batch_len);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = optimizer.step(learning_rate, self.model.clone(), grads);

            pb.set_message(format!("loss {:.4} acc {:.4}", loss_value, accuracy.accuracy()));
            pb.inc(1);
        }
        pb.finish_and_clear();

        (epoch_loss.average(), accuracy.accuracy())
    }

    /// No-gradient pass over the validation split
    pub fn validate(&mut self) -> (f64, f64) {
        self.phase = TrainingPhase::EpochValidating;
        let output = self.evaluate_split(&self.val_set);
        (output.loss, output.accuracy)
    }

    /// Evaluate the held-out test split and store its numbers in the history
    pub fn test(&mut self) -> Result<EvaluationOutput> {
        let test_set = self
            .test_set
            .as_ref()
            .ok_or_else(|| CoffeeDefectError::Training("no test split configured".into()))?;

        let output = self.evaluate_split(test_set);
        self.history.test_loss = Some(output.loss);
        self.history.test_acc = Some(output.accuracy);
        info!("Test Loss: {:.4}, Test Acc: {:.4}", output.loss, output.accuracy);
        Ok(output)
    }

    fn evaluate_split(&self, dataset: &CoffeeBeanBurnDataset) -> EvaluationOutput {
        let model = self.model.valid();
        evaluate(&model, dataset, &self.batcher, self.batch_size, &self.device)
    }

    /// Run until `epochs` or until validation accuracy stalls for `patience`
    /// epochs. The model keeps the terminal weights.
    pub fn train(&mut self, epochs: usize, learning_rate: f64, weight_decay: f64) -> TrainingHistory {
        let mut optimizer = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(weight_decay as f32)))
            .init();

        let mut stopper = EarlyStopping::new(self.patience);
        let mut logger = TrainingLogger::new(epochs);

        info!(
            "Training on {} samples, validating on {} (batch size {}, lr {}, wd {})",
            self.train_set.len(),
            self.val_set.len(),
            self.batch_size,
            learning_rate,
            weight_decay
        );

        for epoch in 0..epochs {
            logger.start_epoch(epoch);

            let (train_loss, train_acc) = self.train_epoch(&mut optimizer, learning_rate);
            let (val_loss, val_acc) = self.validate();

            self.history.record_epoch(train_loss, train_acc, val_loss, val_acc);
            logger.end_epoch(train_loss, train_acc, val_loss, val_acc);

            if stopper.update(epoch, val_acc) {
                logger.log_new_best(val_acc);
            }
            if stopper.should_stop() {
                logger.log_early_stop(stopper.patience());
                self.history.stopped_early = true;
                self.phase = TrainingPhase::EarlyStopped;
                break;
            }
        }

        if !self.phase.is_terminal() {
            self.phase = TrainingPhase::Completed;
        }
        self.history.best_val_acc = stopper.best_score();
        debug!("Run ended in phase: {}", self.phase);
        logger.log_complete(self.history.epochs_run, stopper.best_score());

        self.history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Architecture;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;
    use tempfile::TempDir;

    type AB = Autodiff<NdArray<f32>>;

    fn fixture(dir: &TempDir, count: usize) -> Vec<(PathBuf, usize)> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("bean_{i}.png"));
                let shade: u8 = if i % 2 == 0 { 30 } else { 220 };
                ImageBuffer::from_pixel(32, 32, Rgb([shade, shade, shade]))
                    .save(&path)
                    .unwrap();
                (path, i % 2)
            })
            .collect()
    }

    fn trainer(dir: &TempDir) -> ModelTrainer<AB> {
        let device = Default::default();
        let samples = fixture(dir, 6);
        let train = CoffeeBeanBurnDataset::new_cached(samples.clone(), 32).unwrap();
        let val = CoffeeBeanBurnDataset::new_cached(samples[..2].to_vec(), 32).unwrap();
        let test = CoffeeBeanBurnDataset::new_cached(samples[2..4].to_vec(), 32).unwrap();
        let model = CoffeeClassifier::<AB>::new(Architecture::MobileNetV3, 2, &device).freeze_backbone();

        ModelTrainer::new(model, train, val, 3, 42, device)
            .unwrap()
            .with_test_set(test)
            .with_augmenter(Augmenter::no_augmentation(32))
            .with_patience(1)
    }

    #[test]
    fn test_rejects_empty_training_split() {
        let device = Default::default();
        let empty = CoffeeBeanBurnDataset::new_cached(Vec::new(), 32).unwrap();
        let model = CoffeeClassifier::<AB>::new(Architecture::MobileNetV3, 2, &device);
        let result = ModelTrainer::new(model, empty.clone(), empty, 4, 0, device);
        assert!(matches!(result, Err(CoffeeDefectError::Training(_))));
    }

    #[test]
    fn test_short_run_records_history() {
        let dir = TempDir::new().unwrap();
        let mut trainer = trainer(&dir);

        let history = trainer.train(2, 1e-3, 1e-4);
        assert!(trainer.phase().is_terminal());
        assert!(history.epochs_run >= 1 && history.epochs_run <= 2);
        assert_eq!(history.train_loss.len(), history.epochs_run);
        assert_eq!(history.val_acc.len(), history.epochs_run);
        assert!(history.train_loss.iter().all(|l| l.is_finite()));
        assert!(history.train_acc.iter().all(|a| (0.0..=1.0).contains(a)));

        let output = trainer.test().unwrap();
        assert_eq!(output.labels.len(), 2);
        assert_eq!(trainer.history().test_acc, Some(output.accuracy));
    }

    /// Epochs the loop should run: up to and including the `patience`-th
    /// consecutive epoch without a strictly better validation accuracy.
    fn expected_epochs(val_acc: &[f64], patience: usize, max_epochs: usize) -> (usize, bool) {
        let mut best = 0.0;
        let mut stalled = 0;
        for (epoch, &acc) in val_acc.iter().enumerate() {
            if acc > best {
                best = acc;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= patience {
                    return (epoch + 1, true);
                }
            }
        }
        (max_epochs, false)
    }

    #[test]
    fn test_train_stops_only_after_stalled_epochs() {
        for patience in [0, 1] {
            let dir = TempDir::new().unwrap();
            let mut trainer = trainer(&dir).with_patience(patience);

            let history = trainer.train(4, 1e-3, 1e-4);
            let (epochs, stopped) = expected_epochs(&history.val_acc, patience, 4);
            assert_eq!(
                history.epochs_run, epochs,
                "patience {patience}, val_acc {:?}",
                history.val_acc
            );
            assert_eq!(history.stopped_early, stopped);
            let terminal = if stopped { TrainingPhase::EarlyStopped } else { TrainingPhase::Completed };
            assert_eq!(trainer.phase(), terminal);
        }
    }

    #[test]
    fn test_test_without_split_fails() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let samples = fixture(&dir, 2);
        let train = CoffeeBeanBurnDataset::new_cached(samples.clone(), 32).unwrap();
        let val = CoffeeBeanBurnDataset::new_cached(samples, 32).unwrap();
        let model = CoffeeClassifier::<AB>::new(Architecture::MobileNetV3, 2, &device);

        let mut trainer = ModelTrainer::new(model, train, val, 2, 0, device).unwrap();
        assert!(trainer.test().is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TrainingPhase::EarlyStopped.to_string(), "early stopped");
        assert!(!TrainingPhase::EpochValidating.is_terminal());
    }
}
