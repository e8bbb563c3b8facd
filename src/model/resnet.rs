//! ResNet-50
//!
//! Bottleneck blocks with the stride on the 3x3 convolution (v1.5), stage
//! depths [3, 4, 6, 3] and a single `fc` classifier.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

const EXPANSION: usize = 4;
const STAGE_DEPTHS: [usize; 4] = [3, 4, 6, 3];
const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];

/// Width of the pooled feature vector fed to `fc`
pub const FEATURE_DIM: usize = 512 * EXPANSION;

fn conv_no_bias<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = (kernel - 1) / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// 1x1 projection on the shortcut when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * EXPANSION;
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: conv_no_bias(in_channels, out_channels, 1, stride, device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: conv_no_bias(in_channels, width, 1, 1, device),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: conv_no_bias(width, width, 3, stride, device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: conv_no_bias(width, out_channels, 1, 1, device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.relu.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));

        self.relu.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet50<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    layers: Vec<Vec<Bottleneck<B>>>,
    avgpool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet50<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        let mut in_channels = 64;
        let mut layers = Vec::with_capacity(STAGE_DEPTHS.len());

        for (stage, (&depth, &width)) in STAGE_DEPTHS.iter().zip(STAGE_WIDTHS.iter()).enumerate() {
            let stride = if stage == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(depth);
            for i in 0..depth {
                blocks.push(Bottleneck::new(in_channels, width, if i == 0 { stride } else { 1 }, device));
                in_channels = width * EXPANSION;
            }
            layers.push(blocks);
        }

        Self {
            conv1: conv_no_bias(3, 64, 7, 2, device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layers,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(FEATURE_DIM, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut x = self.maxpool.forward(x);

        for stage in &self.layers {
            for block in stage {
                x = block.forward(x);
            }
        }

        let x = self.avgpool.forward(x).flatten(1, 3);
        self.fc.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.fc.weight.val().dims()[1]
    }

    /// Swap `fc` for a freshly initialized layer
    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc: LinearConfig::new(FEATURE_DIM, num_classes).init(device),
            ..self
        }
    }

    /// Everything but `fc` stops receiving gradients
    pub fn freeze_backbone(self) -> Self {
        Self {
            conv1: self.conv1.no_grad(),
            bn1: self.bn1.no_grad(),
            layers: self.layers.no_grad(),
            ..self
        }
    }
}
