//! One module type for every backbone
//!
//! Training, checkpointing and serving are written once against
//! `CoffeeClassifier`; the architecture decides the variant at build time.

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::convnext::ConvNext;
use super::efficientnet::{EfficientNet, EfficientNetVariant};
use super::mobilenet::MobileNetV3;
use super::resnet::ResNet50;
use super::Architecture;

#[derive(Module, Debug)]
pub enum CoffeeClassifier<B: Backend> {
    ResNet50(ResNet50<B>),
    EfficientNet(EfficientNet<B>),
    MobileNetV3(MobileNetV3<B>),
    ConvNext(ConvNext<B>),
}

impl<B: Backend> CoffeeClassifier<B> {
    /// Randomly initialized network for `architecture`
    pub fn new(architecture: Architecture, num_classes: usize, device: &B::Device) -> Self {
        match architecture {
            Architecture::ResNet50 => Self::ResNet50(ResNet50::new(num_classes, device)),
            Architecture::EfficientNetB0 => Self::EfficientNet(EfficientNet::new(
                EfficientNetVariant::B0,
                num_classes,
                device,
            )),
            Architecture::EfficientNetB2 => Self::EfficientNet(EfficientNet::new(
                EfficientNetVariant::B2,
                num_classes,
                device,
            )),
            Architecture::MobileNetV3 => Self::MobileNetV3(MobileNetV3::new(num_classes, device)),
            Architecture::ConvNextTiny => Self::ConvNext(ConvNext::tiny(num_classes, device)),
        }
    }

    /// Logits of shape [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Self::ResNet50(m) => m.forward(images),
            Self::EfficientNet(m) => m.forward(images),
            Self::MobileNetV3(m) => m.forward(images),
            Self::ConvNext(m) => m.forward(images),
        }
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Output width of the classifier head
    pub fn num_classes(&self) -> usize {
        match self {
            Self::ResNet50(m) => m.num_classes(),
            Self::EfficientNet(m) => m.num_classes(),
            Self::MobileNetV3(m) => m.num_classes(),
            Self::ConvNext(m) => m.num_classes(),
        }
    }

    /// Replace the final linear layer with a fresh one of `num_classes` outputs
    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        match self {
            Self::ResNet50(m) => Self::ResNet50(m.with_head(num_classes, device)),
            Self::EfficientNet(m) => Self::EfficientNet(m.with_head(num_classes, device)),
            Self::MobileNetV3(m) => Self::MobileNetV3(m.with_head(num_classes, device)),
            Self::ConvNext(m) => Self::ConvNext(m.with_head(num_classes, device)),
        }
    }

    /// Stop gradients everywhere except the classifier block
    pub fn freeze_backbone(self) -> Self {
        match self {
            Self::ResNet50(m) => Self::ResNet50(m.freeze_backbone()),
            Self::EfficientNet(m) => Self::EfficientNet(m.freeze_backbone()),
            Self::MobileNetV3(m) => Self::MobileNetV3(m.freeze_backbone()),
            Self::ConvNext(m) => Self::ConvNext(m.freeze_backbone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::module::AutodiffModule;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_every_architecture_builds_and_runs() {
        let device = Default::default();
        for arch in Architecture::ALL {
            let model = CoffeeClassifier::<B>::new(arch, 17, &device);
            let logits = model.forward(Tensor::zeros([1, 3, 64, 64], &device));
            assert_eq!(logits.dims(), [1, 17], "{arch}");
        }
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = CoffeeClassifier::<B>::new(Architecture::MobileNetV3, 17, &device);
        let probs = model.forward_softmax(Tensor::ones([2, 3, 32, 32], &device));
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_with_head_changes_output_width() {
        let device = Default::default();
        let model = CoffeeClassifier::<B>::new(Architecture::ResNet50, 1000, &device);
        assert_eq!(model.num_classes(), 1000);
        let model = model.with_head(17, &device);
        assert_eq!(model.num_classes(), 17);
    }

    #[test]
    fn test_freeze_backbone_keeps_head_trainable() {
        type AB = Autodiff<B>;
        let device = Default::default();
        let model = CoffeeClassifier::<AB>::new(Architecture::MobileNetV3, 17, &device);
        let trainable_before = model.num_params();

        let frozen = model.freeze_backbone();
        assert_eq!(frozen.num_params(), trainable_before);

        let logits = frozen.forward(Tensor::ones([1, 3, 32, 32], &device));
        let grads = logits.sum().backward();
        let CoffeeClassifier::MobileNetV3(inner) = &frozen else {
            panic!("expected mobilenet");
        };
        assert!(inner.fc2.weight.val().grad(&grads).is_some());

        // the inference view drops autodiff entirely
        let valid = frozen.valid();
        assert_eq!(valid.num_classes(), 17);
    }
}
