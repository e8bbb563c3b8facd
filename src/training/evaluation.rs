//! Gradient-free evaluation over a whole split

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::dataset::{CoffeeBeanBatch, CoffeeBeanBatcher, CoffeeBeanBurnDataset};
use crate::model::CoffeeClassifier;
use crate::utils::metrics::{AccuracyTracker, RunningAverage};

/// Loss, accuracy and every prediction of one pass over a split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationOutput {
    /// Mean of the batch cross-entropies
    pub loss: f64,
    /// Fraction of correct predictions in [0, 1]
    pub accuracy: f64,
    /// Predicted class per sample, in dataset order
    pub predictions: Vec<usize>,
    /// True class per sample, in dataset order
    pub labels: Vec<usize>,
}

/// Run `model` over `dataset` in order, without augmentation.
///
/// An empty dataset yields zero loss and zero accuracy.
pub fn evaluate<B: Backend>(
    model: &CoffeeClassifier<B>,
    dataset: &CoffeeBeanBurnDataset,
    batcher: &CoffeeBeanBatcher,
    batch_size: usize,
    device: &B::Device,
) -> EvaluationOutput {
    let len = dataset.len();
    let batch_size = batch_size.max(1);
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss_avg = RunningAverage::new();
    let mut accuracy = AccuracyTracker::new();
    let mut predictions = Vec::with_capacity(len);
    let mut labels = Vec::with_capacity(len);

    for start in (0..len).step_by(batch_size) {
        let end = (start + batch_size).min(len);
        let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch: CoffeeBeanBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);

        let loss = loss_fn.forward(output.clone(), batch.targets.clone());
        loss_avg.add(loss.into_scalar().elem::<f64>());

        let batch_predictions = tensor_to_indices(argmax_rows(output));
        let batch_labels = tensor_to_indices(batch.targets);
        accuracy.add_batch(&batch_predictions, &batch_labels);

        predictions.extend(batch_predictions);
        labels.extend(batch_labels);
    }

    EvaluationOutput {
        loss: loss_avg.average(),
        accuracy: accuracy.accuracy(),
        predictions,
        labels,
    }
}

/// Row-wise argmax of a `[N, C]` tensor as a `[N]` tensor
pub fn argmax_rows<B: Backend>(output: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [batch_size, _] = output.dims();
    output.argmax(1).reshape([batch_size])
}

/// Number of positions where `predictions` equals `targets`
pub fn count_correct<B: Backend>(predictions: Tensor<B, 1, Int>, targets: Tensor<B, 1, Int>) -> usize {
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

fn tensor_to_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.max(0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Architecture;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    type B = NdArray<f32>;

    #[test]
    fn test_argmax_and_count_correct() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_floats([[0.1, 0.9, 0.0], [2.0, 0.5, 0.1], [0.0, 0.0, 3.0]], &device);
        let preds = argmax_rows(logits);
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![1i64, 0, 1], [3]), &device);
        assert_eq!(count_correct(preds, targets), 2);
    }

    #[test]
    fn test_empty_split() {
        let device = Default::default();
        let model = CoffeeClassifier::<B>::new(Architecture::MobileNetV3, 17, &device);
        let dataset = CoffeeBeanBurnDataset::new_cached(Vec::new(), 32).unwrap();

        let out = evaluate(&model, &dataset, &CoffeeBeanBatcher::new(32), 4, &device);
        assert_eq!(out.loss, 0.0);
        assert_eq!(out.accuracy, 0.0);
        assert!(out.predictions.is_empty());
    }

    #[test]
    fn test_evaluate_keeps_dataset_order() {
        let dir = TempDir::new().unwrap();
        let mut samples = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("{i}.png"));
            ImageBuffer::from_pixel(32, 32, Rgb([i as u8 * 40, 90, 30])).save(&path).unwrap();
            samples.push((path, i % 3));
        }
        let dataset = CoffeeBeanBurnDataset::new_cached(samples, 32).unwrap();

        let device = Default::default();
        let model = CoffeeClassifier::<B>::new(Architecture::MobileNetV3, 3, &device);
        let out = evaluate(&model, &dataset, &CoffeeBeanBatcher::new(32), 2, &device);

        assert_eq!(out.labels, vec![0, 1, 2, 0, 1]);
        assert_eq!(out.predictions.len(), 5);
        assert!(out.predictions.iter().all(|&p| p < 3));
        assert!((0.0..=1.0).contains(&out.accuracy));
        assert!(out.loss.is_finite());
    }
}
