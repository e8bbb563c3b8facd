//! ConvNeXt-Tiny
//!
//! Patchify stem, four stages of depthwise 7x7 blocks with layer scale, and a
//! `LayerNorm2d -> flatten -> Linear` classifier.

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::gelu, backend::Backend, Tensor},
};

use super::layers::LayerNorm2d;

const DEPTHS: [usize; 4] = [3, 3, 9, 3];
const DIMS: [usize; 4] = [96, 192, 384, 768];
const LN_EPSILON: f64 = 1e-6;
const LAYER_SCALE_INIT: f64 = 1e-6;

#[derive(Module, Debug)]
pub struct CNBlock<B: Backend> {
    dwconv: Conv2d<B>,
    norm: LayerNorm<B>,
    pwconv1: Linear<B>,
    pwconv2: Linear<B>,
    layer_scale: Param<Tensor<B, 1>>,
}

impl<B: Backend> CNBlock<B> {
    fn new(dim: usize, device: &B::Device) -> Self {
        Self {
            dwconv: Conv2dConfig::new([dim, dim], [7, 7])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_groups(dim)
                .init(device),
            norm: LayerNormConfig::new(dim).with_epsilon(LN_EPSILON).init(device),
            pwconv1: LinearConfig::new(dim, 4 * dim).init(device),
            pwconv2: LinearConfig::new(4 * dim, dim).init(device),
            layer_scale: Param::from_tensor(Tensor::full([dim], LAYER_SCALE_INIT, device)),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        // channels-last for the norm and pointwise layers
        let out = self.dwconv.forward(x.clone()).permute([0, 2, 3, 1]);
        let out = self.norm.forward(out);
        let out = gelu(self.pwconv1.forward(out));
        let out = self.pwconv2.forward(out);
        let out = out * self.layer_scale.val().reshape([1, 1, 1, channels]);

        out.permute([0, 3, 1, 2]) + x
    }
}

/// LayerNorm2d followed by a 2x2 stride-2 convolution
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    norm: LayerNorm2d<B>,
    conv: Conv2d<B>,
}

impl<B: Backend> Downsample<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.norm.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    downsample: Option<Downsample<B>>,
    blocks: Vec<CNBlock<B>>,
}

#[derive(Module, Debug)]
pub struct ConvNext<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_norm: LayerNorm2d<B>,
    stages: Vec<Stage<B>>,
    avgpool: AdaptiveAvgPool2d,
    head_norm: LayerNorm2d<B>,
    pub head: Linear<B>,
}

impl<B: Backend> ConvNext<B> {
    pub fn tiny(num_classes: usize, device: &B::Device) -> Self {
        let stages = DEPTHS
            .iter()
            .zip(DIMS.iter())
            .enumerate()
            .map(|(i, (&depth, &dim))| Stage {
                downsample: (i > 0).then(|| Downsample {
                    norm: LayerNorm2d::new(DIMS[i - 1], LN_EPSILON, device),
                    conv: Conv2dConfig::new([DIMS[i - 1], dim], [2, 2])
                        .with_stride([2, 2])
                        .init(device),
                }),
                blocks: (0..depth).map(|_| CNBlock::new(dim, device)).collect(),
            })
            .collect();

        let last_dim = DIMS[DIMS.len() - 1];
        Self {
            stem_conv: Conv2dConfig::new([3, DIMS[0]], [4, 4])
                .with_stride([4, 4])
                .init(device),
            stem_norm: LayerNorm2d::new(DIMS[0], LN_EPSILON, device),
            stages,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head_norm: LayerNorm2d::new(last_dim, LN_EPSILON, device),
            head: LinearConfig::new(last_dim, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem_norm.forward(self.stem_conv.forward(x));

        for stage in &self.stages {
            if let Some(downsample) = &stage.downsample {
                x = downsample.forward(x);
            }
            for block in &stage.blocks {
                x = block.forward(x);
            }
        }

        let x = self.head_norm.forward(self.avgpool.forward(x));
        self.head.forward(x.flatten(1, 3))
    }

    pub fn num_classes(&self) -> usize {
        self.head.weight.val().dims()[1]
    }

    /// Replace `classifier[2]`; the classifier's norm is kept
    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        Self {
            head: LinearConfig::new(DIMS[DIMS.len() - 1], num_classes).init(device),
            ..self
        }
    }

    pub fn freeze_backbone(self) -> Self {
        Self {
            stem_conv: self.stem_conv.no_grad(),
            stem_norm: self.stem_norm.no_grad(),
            stages: self.stages.no_grad(),
            ..self
        }
    }
}
