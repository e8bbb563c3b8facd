//! Building blocks shared by the backbones

use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, LayerNorm, LayerNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{gelu, hard_sigmoid, relu, sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};

/// Elementwise activation, stored on modules as a constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Relu,
    Silu,
    Gelu,
    HardSwish,
    Sigmoid,
    HardSigmoid,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => x,
            Activation::Relu => relu(x),
            Activation::Silu => silu(x),
            Activation::Gelu => gelu(x),
            Activation::HardSwish => x.clone() * hard_sigmoid(x, 1.0 / 6.0, 0.5),
            Activation::Sigmoid => sigmoid(x),
            Activation::HardSigmoid => hard_sigmoid(x, 1.0 / 6.0, 0.5),
        }
    }
}

/// Round `value` to the nearest multiple of `divisor`, never dropping more
/// than 10% below it
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((value + d / 2.0) / d).floor() * d).max(d);
    let rounded = if rounded < 0.9 * value { rounded + d } else { rounded };
    rounded as usize
}

/// Conv (no bias) + BatchNorm + activation, padded to keep `H / stride`
#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    activation: Ignored<Activation>,
}

impl<B: Backend> ConvNormActivation<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: Activation,
        bn_epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels)
            .with_epsilon(bn_epsilon)
            .init(device);

        Self {
            conv,
            bn,
            activation: Ignored(activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.activation.0.apply(x)
    }
}

/// Channel attention: pool, squeeze, excite, rescale
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    pub fc1: Conv2d<B>,
    pub fc2: Conv2d<B>,
    activation: Ignored<Activation>,
    scale_activation: Ignored<Activation>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(
        channels: usize,
        squeeze_channels: usize,
        activation: Activation,
        scale_activation: Activation,
        device: &B::Device,
    ) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
            activation: Ignored(activation),
            scale_activation: Ignored(scale_activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = self.activation.0.apply(self.fc1.forward(scale));
        let scale = self.scale_activation.0.apply(self.fc2.forward(scale));
        x * scale
    }
}

/// LayerNorm over the channel dimension of an NCHW tensor
#[derive(Module, Debug)]
pub struct LayerNorm2d<B: Backend> {
    pub norm: LayerNorm<B>,
}

impl<B: Backend> LayerNorm2d<B> {
    pub fn new(channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(channels).with_epsilon(epsilon).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = x.permute([0, 2, 3, 1]);
        self.norm.forward(x).permute([0, 3, 1, 2])
    }
}
