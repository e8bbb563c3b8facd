//! EfficientNet B0 / B2
//!
//! MBConv stages scaled by a width and a depth multiplier. The classifier is
//! dropout followed by one linear layer (`classifier[1]`).

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use super::layers::{make_divisible, Activation, ConvNormActivation, SqueezeExcitation};

const BN_EPSILON: f64 = 1e-5;

/// (expand ratio, kernel, stride, in channels, out channels, layers)
const STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

/// Compound scaling for one variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficientNetVariant {
    pub width_mult: f64,
    pub depth_mult: f64,
    pub dropout: f64,
}

impl EfficientNetVariant {
    pub const B0: Self = Self {
        width_mult: 1.0,
        depth_mult: 1.0,
        dropout: 0.2,
    };

    pub const B2: Self = Self {
        width_mult: 1.1,
        depth_mult: 1.2,
        dropout: 0.3,
    };

    fn channels(&self, c: usize) -> usize {
        make_divisible(c as f64 * self.width_mult, 8)
    }

    fn repeats(&self, layers: usize) -> usize {
        (layers as f64 * self.depth_mult).ceil() as usize
    }

    /// Channels after the final 1x1 convolution
    pub fn feature_dim(&self) -> usize {
        4 * self.channels(STAGES[STAGES.len() - 1].4)
    }
}

/// Inverted residual with squeeze-excitation
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    expand: Option<ConvNormActivation<B>>,
    depthwise: ConvNormActivation<B>,
    se: SqueezeExcitation<B>,
    project: ConvNormActivation<B>,
    use_residual: bool,
}

impl<B: Backend> MBConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let expanded = in_channels * expand_ratio;
        let expand = (expanded != in_channels).then(|| {
            ConvNormActivation::new(in_channels, expanded, 1, 1, 1, Activation::Silu, BN_EPSILON, device)
        });
        let squeeze = (in_channels / 4).max(1);

        Self {
            expand,
            depthwise: ConvNormActivation::new(
                expanded,
                expanded,
                kernel,
                stride,
                expanded,
                Activation::Silu,
                BN_EPSILON,
                device,
            ),
            se: SqueezeExcitation::new(expanded, squeeze, Activation::Silu, Activation::Sigmoid, device),
            project: ConvNormActivation::new(
                expanded,
                out_channels,
                1,
                1,
                1,
                Activation::Identity,
                BN_EPSILON,
                device,
            ),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = expand.forward(out);
        }
        let out = self.depthwise.forward(out);
        let out = self.se.forward(out);
        let out = self.project.forward(out);

        if self.use_residual {
            out + x
        } else {
            out
        }
    }
}

#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    stem: ConvNormActivation<B>,
    blocks: Vec<MBConv<B>>,
    head_conv: ConvNormActivation<B>,
    avgpool: AdaptiveAvgPool2d,
    dropout: Dropout,
    pub classifier: Linear<B>,
}

impl<B: Backend> EfficientNet<B> {
    pub fn new(variant: EfficientNetVariant, num_classes: usize, device: &B::Device) -> Self {
        let stem_channels = variant.channels(STAGES[0].3);
        let stem = ConvNormActivation::new(3, stem_channels, 3, 2, 1, Activation::Silu, BN_EPSILON, device);

        let mut blocks = Vec::new();
        for &(expand_ratio, kernel, stride, in_c, out_c, layers) in STAGES.iter() {
            let in_c = variant.channels(in_c);
            let out_c = variant.channels(out_c);
            for i in 0..variant.repeats(layers) {
                let (block_in, block_stride) = if i == 0 { (in_c, stride) } else { (out_c, 1) };
                blocks.push(MBConv::new(block_in, out_c, expand_ratio, kernel, block_stride, device));
            }
        }

        let last_channels = variant.channels(STAGES[STAGES.len() - 1].4);
        let feature_dim = variant.feature_dim();

        Self {
            stem,
            blocks,
            head_conv: ConvNormActivation::new(
                last_channels,
                feature_dim,
                1,
                1,
                1,
                Activation::Silu,
                BN_EPSILON,
                device,
            ),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(variant.dropout).init(),
            classifier: LinearConfig::new(feature_dim, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.head_conv.forward(x);

        let x = self.avgpool.forward(x).flatten(1, 3);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.weight.val().dims()[1]
    }

    fn feature_dim(&self) -> usize {
        self.classifier.weight.val().dims()[0]
    }

    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        let feature_dim = self.feature_dim();
        Self {
            classifier: LinearConfig::new(feature_dim, num_classes).init(device),
            ..self
        }
    }

    pub fn freeze_backbone(self) -> Self {
        Self {
            stem: self.stem.no_grad(),
            blocks: self.blocks.no_grad(),
            head_conv: self.head_conv.no_grad(),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_variant_dimensions() {
        assert_eq!(EfficientNetVariant::B0.feature_dim(), 1280);
        assert_eq!(EfficientNetVariant::B2.feature_dim(), 1408);
        assert_eq!(EfficientNetVariant::B2.channels(32), 32);
        assert_eq!(EfficientNetVariant::B2.repeats(3), 4);
    }

    #[test]
    fn test_block_counts() {
        let device = Default::default();
        let b0 = EfficientNet::<B>::new(EfficientNetVariant::B0, 10, &device);
        assert_eq!(b0.blocks.len(), 16);

        let b2 = EfficientNet::<B>::new(EfficientNetVariant::B2, 10, &device);
        assert_eq!(b2.blocks.len(), 23);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = EfficientNet::<B>::new(EfficientNetVariant::B0, 17, &device);
        let logits = model.forward(Tensor::zeros([2, 3, 64, 64], &device));
        assert_eq!(logits.dims(), [2, 17]);
    }

    #[test]
    fn test_with_head_keeps_feature_dim() {
        let device = Default::default();
        let model = EfficientNet::<B>::new(EfficientNetVariant::B2, 1000, &device).with_head(17, &device);
        assert_eq!(model.num_classes(), 17);
        assert_eq!(model.feature_dim(), 1408);
    }
}
