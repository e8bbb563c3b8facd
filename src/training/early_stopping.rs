//! Patience-based early stopping on validation accuracy

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of epochs without improvement before stopping
pub const DEFAULT_PATIENCE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    counter: usize,
    best_score: f64,
    best_epoch: Option<usize>,
    stop: bool,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new(DEFAULT_PATIENCE)
    }
}

impl EarlyStopping {
    /// Tracking starts from a best score of 0.0
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            counter: 0,
            best_score: 0.0,
            best_epoch: None,
            stop: false,
        }
    }

    /// Record one epoch's validation accuracy. Returns true on a new best.
    ///
    /// Only a strictly greater score counts as an improvement. The stop
    /// decision is only taken on an epoch that did not improve.
    pub fn update(&mut self, epoch: usize, val_acc: f64) -> bool {
        if val_acc > self.best_score {
            self.best_score = val_acc;
            self.best_epoch = Some(epoch);
            self.counter = 0;
            self.stop = false;
            true
        } else {
            self.counter += 1;
            self.stop = self.counter >= self.patience;
            debug!(
                "No improvement for {} epoch(s) (best: {:.4})",
                self.counter, self.best_score
            );
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Epoch index of the best score, if any epoch improved on 0.0
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Number of epochs a loop runs with the given validation curve
    fn epochs_run(curve: &[f64], patience: usize, max_epochs: usize) -> usize {
        let mut stopper = EarlyStopping::new(patience);
        for epoch in 0..max_epochs {
            stopper.update(epoch, curve[epoch.min(curve.len() - 1)]);
            if stopper.should_stop() {
                return epoch + 1;
            }
        }
        max_epochs
    }

    #[test]
    fn test_halts_patience_epochs_after_peak() {
        // peak at epoch 3 (1-based), flat afterwards
        let curve = [0.3, 0.5, 0.7, 0.6, 0.6, 0.65, 0.7, 0.69];
        assert_eq!(epochs_run(&curve, 5, 20), 3 + 5);
        assert_eq!(epochs_run(&curve, 2, 20), 3 + 2);
    }

    #[test]
    fn test_max_epochs_caps_the_run() {
        let curve = [0.3, 0.5, 0.7, 0.6];
        assert_eq!(epochs_run(&curve, 5, 6), 6);
    }

    #[test]
    fn test_equal_score_is_not_an_improvement() {
        let mut stopper = EarlyStopping::new(2);
        assert!(stopper.update(0, 0.5));
        assert!(!stopper.update(1, 0.5));
        assert_eq!(stopper.counter(), 1);
        assert!(!stopper.should_stop());
        assert!(!stopper.update(2, 0.4));
        assert!(stopper.should_stop());
        assert_eq!(stopper.best_epoch(), Some(0));
    }

    #[test]
    fn test_zero_patience_stops_only_on_a_stall() {
        let improving = [0.1, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(epochs_run(&improving, 0, 5), 5);

        let mut stopper = EarlyStopping::new(0);
        assert!(stopper.update(0, 0.4));
        assert!(!stopper.should_stop());
        assert!(!stopper.update(1, 0.4));
        assert!(stopper.should_stop());
    }

    #[test]
    fn test_zero_accuracy_never_improves() {
        let mut stopper = EarlyStopping::new(1);
        assert!(!stopper.update(0, 0.0));
        assert!(stopper.should_stop());
        assert_eq!(stopper.best_epoch(), None);
    }
}
