//! Logging Module
//!
//! Structured logging on top of `tracing`, plus a small epoch logger used by
//! the training loop.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Initialize the global subscriber with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Epoch-level progress logger for a training run
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    /// Only every `report_every`-th epoch is logged at info level
    report_every: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            report_every: 5,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    pub fn with_report_interval(mut self, every: usize) -> Self {
        self.report_every = every.max(1);
        self
    }

    /// Whether the (zero-based) epoch is one that gets an info-level summary
    pub fn is_report_epoch(&self, epoch: usize) -> bool {
        (epoch + 1) % self.report_every == 0
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with train/validation metrics
    pub fn end_epoch(&self, train_loss: f64, train_acc: f64, val_loss: f64, val_acc: f64) {
        let epoch_secs = self.epoch_start.elapsed().as_secs_f64();

        if self.is_report_epoch(self.epoch) {
            tracing::info!(
                "Epoch [{}/{}] - Train Loss: {:.4}, Train Acc: {:.4} | Val Loss: {:.4}, Val Acc: {:.4} ({:.1}s)",
                self.epoch + 1,
                self.total_epochs,
                train_loss,
                train_acc,
                val_loss,
                val_acc,
                epoch_secs
            );
        } else {
            tracing::debug!(
                "Epoch [{}/{}] - Train Loss: {:.4}, Train Acc: {:.4} | Val Loss: {:.4}, Val Acc: {:.4} ({:.1}s)",
                self.epoch + 1,
                self.total_epochs,
                train_loss,
                train_acc,
                val_loss,
                val_acc,
                epoch_secs
            );
        }
    }

    pub fn log_new_best(&self, val_acc: f64) {
        tracing::debug!("New best validation accuracy: {:.4}", val_acc);
    }

    pub fn log_early_stop(&self, patience: usize) {
        tracing::warn!(
            "Early stopping at epoch {} ({} epochs without improvement)",
            self.epoch + 1,
            patience
        );
    }

    pub fn log_complete(&self, epochs_run: usize, best_val_acc: f64) {
        tracing::info!(
            "Training finished: {} epochs in {:.1}s | Best val acc: {:.4}",
            epochs_run,
            self.training_start.elapsed().as_secs_f64(),
            best_val_acc
        );
    }
}
