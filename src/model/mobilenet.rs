//! MobileNetV3-Large

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use super::layers::{make_divisible, Activation, ConvNormActivation, SqueezeExcitation};

const BN_EPSILON: f64 = 1e-3;
const LAST_CONV_CHANNELS: usize = 960;
const LAST_CHANNEL: usize = 1280;

/// One row of the large configuration table
#[derive(Clone, Copy)]
struct BlockSetting {
    input: usize,
    kernel: usize,
    expanded: usize,
    out: usize,
    use_se: bool,
    activation: Activation,
    stride: usize,
}

const fn row(
    input: usize,
    kernel: usize,
    expanded: usize,
    out: usize,
    use_se: bool,
    hardswish: bool,
    stride: usize,
) -> BlockSetting {
    BlockSetting {
        input,
        kernel,
        expanded,
        out,
        use_se,
        activation: if hardswish { Activation::HardSwish } else { Activation::Relu },
        stride,
    }
}

const LARGE: [BlockSetting; 15] = [
    row(16, 3, 16, 16, false, false, 1),
    row(16, 3, 64, 24, false, false, 2),
    row(24, 3, 72, 24, false, false, 1),
    row(24, 5, 72, 40, true, false, 2),
    row(40, 5, 120, 40, true, false, 1),
    row(40, 5, 120, 40, true, false, 1),
    row(40, 3, 240, 80, false, true, 2),
    row(80, 3, 200, 80, false, true, 1),
    row(80, 3, 184, 80, false, true, 1),
    row(80, 3, 184, 80, false, true, 1),
    row(80, 3, 480, 112, true, true, 1),
    row(112, 3, 672, 112, true, true, 1),
    row(112, 5, 672, 160, true, true, 2),
    row(160, 5, 960, 160, true, true, 1),
    row(160, 5, 960, 160, true, true, 1),
];

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvNormActivation<B>>,
    depthwise: ConvNormActivation<B>,
    se: Option<SqueezeExcitation<B>>,
    project: ConvNormActivation<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(setting: &BlockSetting, device: &B::Device) -> Self {
        let BlockSetting {
            input,
            kernel,
            expanded,
            out,
            use_se,
            activation,
            stride,
        } = *setting;

        let expand = (expanded != input).then(|| {
            ConvNormActivation::new(input, expanded, 1, 1, 1, activation, BN_EPSILON, device)
        });
        let se = use_se.then(|| {
            SqueezeExcitation::new(
                expanded,
                make_divisible(expanded as f64 / 4.0, 8),
                Activation::Relu,
                Activation::HardSigmoid,
                device,
            )
        });

        Self {
            expand,
            depthwise: ConvNormActivation::new(
                expanded, expanded, kernel, stride, expanded, activation, BN_EPSILON, device,
            ),
            se,
            project: ConvNormActivation::new(expanded, out, 1, 1, 1, Activation::Identity, BN_EPSILON, device),
            use_residual: stride == 1 && input == out,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = expand.forward(out);
        }
        out = self.depthwise.forward(out);
        if let Some(se) = &self.se {
            out = se.forward(out);
        }
        let out = self.project.forward(out);

        if self.use_residual {
            out + x
        } else {
            out
        }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV3<B: Backend> {
    stem: ConvNormActivation<B>,
    blocks: Vec<InvertedResidual<B>>,
    last_conv: ConvNormActivation<B>,
    avgpool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> MobileNetV3<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        let last_block_out = LARGE[LARGE.len() - 1].out;

        Self {
            stem: ConvNormActivation::new(3, LARGE[0].input, 3, 2, 1, Activation::HardSwish, BN_EPSILON, device),
            blocks: LARGE.iter().map(|s| InvertedResidual::new(s, device)).collect(),
            last_conv: ConvNormActivation::new(
                last_block_out,
                LAST_CONV_CHANNELS,
                1,
                1,
                1,
                Activation::HardSwish,
                BN_EPSILON,
                device,
            ),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(LAST_CONV_CHANNELS, LAST_CHANNEL).init(device),
            dropout: DropoutConfig::new(0.2).init(),
            fc2: LinearConfig::new(LAST_CHANNEL, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.last_conv.forward(x);
        let x = self.avgpool.forward(x).flatten(1, 3);

        let x = Activation::HardSwish.apply(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.fc2.weight.val().dims()[1]
    }

    /// Replace the final linear layer (`classifier[3]`)
    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc2: LinearConfig::new(LAST_CHANNEL, num_classes).init(device),
            ..self
        }
    }

    /// Freeze the feature extractor; both classifier linears stay trainable
    pub fn freeze_backbone(self) -> Self {
        Self {
            stem: self.stem.no_grad(),
            blocks: self.blocks.no_grad(),
            last_conv: self.last_conv.no_grad(),
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
    fn test_forward_shape() {
        let device = Default::default();
        let model = MobileNetV3::<B>::new(17, &device);
        let logits = model.forward(Tensor::zeros([2, 3, 64, 64], &device));
        assert_eq!(logits.dims(), [2, 17]);
        assert_eq!(model.num_classes(), 17);
    }

    #[test]
    fn test_block_table() {
        let device = Default::default();
        let model = MobileNetV3::<B>::new(1000, &device);
        assert_eq!(model.blocks.len(), 15);
        // first block has no expansion stage
        assert!(model.blocks[0].expand.is_none());
        assert!(model.blocks[3].se.is_some());
        assert_eq!(model.blocks.iter().filter(|b| b.use_residual).count(), 10);
    }

    #[test]
    fn test_with_head() {
        let device = Default::default();
        let model = MobileNetV3::<B>::new(1000, &device).with_head(5, &device);
        assert_eq!(model.num_classes(), 5);
    }
}
