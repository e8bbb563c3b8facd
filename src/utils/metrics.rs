//! Metrics for evaluating defect classifiers
//!
//! Confusion matrix, per-class precision/recall/F1 and the running
//! accumulators used inside the training loop.

use serde::{Deserialize, Serialize};

/// Evaluation report over one split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    /// Averages over classes that have at least one true sample
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// F1 weighted by class support
    pub weighted_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build a report from predicted and true labels.
    ///
    /// Pairs beyond the shorter slice are ignored.
    pub fn from_predictions(predictions: &[usize], labels: &[usize], num_classes: usize) -> Self {
        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, labels, num_classes);
        let total_samples = confusion_matrix.total();
        if total_samples == 0 {
            return Self {
                confusion_matrix,
                ..Self::default()
            };
        }

        let correct_predictions = confusion_matrix.correct();
        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx))
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let mean = |f: fn(&ClassMetrics) -> f64| {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|m| f(m)).sum::<f64>() / supported.len() as f64
            }
        };

        let macro_precision = mean(|m| m.precision);
        let macro_recall = mean(|m| m.recall);
        let macro_f1 = mean(|m| m.f1);

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_support as f64
        } else {
            0.0
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy: correct_predictions as f64 / total_samples as f64,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Attach class names to the per-class entries
    pub fn with_class_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for m in &mut self.per_class {
            m.class_name = names.get(m.class_idx).map(|n| n.as_ref().to_string());
        }
        self
    }

    /// Classification report table (one row per class plus averages)
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>16} {:>10} {:>10} {:>10} {:>8}\n",
            "class", "precision", "recall", "f1", "support"
        ));
        for m in &self.per_class {
            let name = m
                .class_name
                .clone()
                .unwrap_or_else(|| m.class_idx.to_string());
            out.push_str(&format!(
                "{:>16} {:>10.4} {:>10.4} {:>10.4} {:>8}\n",
                name, m.precision, m.recall, m.f1, m.support
            ));
        }
        out.push('\n');
        out.push_str(&format!(
            "{:>16} {:>10} {:>10} {:>10.4} {:>8}\n",
            "accuracy", "", "", self.accuracy, self.total_samples
        ));
        out.push_str(&format!(
            "{:>16} {:>10.4} {:>10.4} {:>10.4} {:>8}\n",
            "macro avg", self.macro_precision, self.macro_recall, self.macro_f1, self.total_samples
        ));
        out.push_str(&format!(
            "{:>16} {:>10} {:>10} {:>10.4} {:>8}\n",
            "weighted avg", "", "", self.weighted_f1, self.total_samples
        ));
        out
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.report())
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP)
    pub precision: f64,
    /// TP / (TP + FN)
    pub recall: f64,
    pub f1: f64,
    /// Number of true samples of this class
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let tp = cm.get(class_idx, class_idx);
        let fp = cm.col_sums().get(class_idx).copied().unwrap_or(0) - tp;
        let fn_ = cm.row_sums().get(class_idx).copied().unwrap_or(0) - tp;

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

/// Confusion matrix, rows = actual, columns = predicted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// Row-major counts
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], labels: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(labels.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Record one prediction; out-of-range indices are dropped
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Render the matrix with abbreviated class names as headers
    pub fn display<S: AsRef<str>>(&self, class_names: Option<&[S]>) -> String {
        let label = |idx: usize, width: usize| -> String {
            match class_names.and_then(|names| names.get(idx)) {
                Some(name) => name.as_ref().chars().take(width).collect(),
                None => idx.to_string(),
            }
        };

        let mut out = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");
        out.push_str(&format!("{:>10}", ""));
        for col in 0..self.num_classes {
            out.push_str(&format!("{:>6}", label(col, 5)));
        }
        out.push('\n');

        for row in 0..self.num_classes {
            out.push_str(&format!("{:>9} ", label(row, 9)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    out.push_str(&format!("[{:>4}]", count));
                } else if count > 0 {
                    out.push_str(&format!(" {:>4} ", count));
                } else {
                    out.push_str("    . ");
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Running mean of a scalar (batch losses)
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Counts correct predictions across batches
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_counts(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn add_batch(&mut self, predictions: &[usize], labels: &[usize]) {
        let correct = predictions
            .iter()
            .zip(labels.iter())
            .filter(|(p, l)| p == l)
            .count();
        self.add_counts(correct, predictions.len().min(labels.len()));
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let labels = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &labels, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let labels = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &labels, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.support, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_ignore_unsupported_classes_in_macro_average() {
        // class 2 never appears as a true label
        let predictions = vec![0, 1, 1, 0];
        let labels = vec![0, 1, 1, 0];
        let metrics = Metrics::from_predictions(&predictions, &labels, 3);

        assert_eq!(metrics.correct_predictions, 4);
        assert!((metrics.accuracy - 1.0).abs() < 1e-9);
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-9);
        assert!((metrics.weighted_f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_predictions() {
        let metrics = Metrics::from_predictions(&[], &[], 17);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(metrics.accuracy, 0.0);
    }

    #[test]
    fn test_report_uses_class_names() {
        let metrics = Metrics::from_predictions(&[0, 1], &[0, 1], 2)
            .with_class_names(&["black", "broken"]);
        let report = metrics.report();
        assert!(report.contains("black"));
        assert!(report.contains("broken"));
        assert!(report.contains("macro avg"));
    }

    #[test]
    fn test_running_average_and_accuracy_tracker() {
        let mut avg = RunningAverage::new();
        avg.add(1.0);
        avg.add(2.0);
        avg.add(3.0);
        assert_eq!(avg.count(), 3);
        assert!((avg.average() - 2.0).abs() < 1e-9);

        let mut tracker = AccuracyTracker::new();
        tracker.add_batch(&[0, 1, 2], &[0, 1, 0]);
        tracker.add_counts(1, 1);
        assert_eq!(tracker.count(), 4);
        assert!((tracker.accuracy() - 0.75).abs() < 1e-9);
    }
}
