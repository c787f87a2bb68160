//! EfficientNet feature extractor built from MBConv blocks
//!
//! Stage table follows EfficientNet-B1 (B0 widths, depth scaled by 1.1).
//! The extractor ends in a 1x1 projection to `head_channels` followed by
//! global average pooling.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};
use serde::{Deserialize, Serialize};

/// One row of the stage table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MbStage {
    pub expand_ratio: usize,
    pub kernel: usize,
    pub stride: usize,
    pub out_channels: usize,
    pub repeats: usize,
}

impl MbStage {
    const fn new(expand_ratio: usize, kernel: usize, stride: usize, out_channels: usize, repeats: usize) -> Self {
        Self {
            expand_ratio,
            kernel,
            stride,
            out_channels,
            repeats,
        }
    }
}

#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    pub stages: Vec<MbStage>,
    #[config(default = "32")]
    pub stem_channels: usize,
    #[config(default = "1280")]
    pub head_channels: usize,
    /// Dropout applied to the pooled features before the dense head
    #[config(default = "0.8")]
    pub head_input_dropout: f64,
    #[config(default = "200")]
    pub head_hidden: usize,
}

impl EfficientNetConfig {
    pub fn b1() -> Self {
        Self::new(vec![
            MbStage::new(1, 3, 1, 16, 1),
            MbStage::new(6, 3, 2, 24, 3),
            MbStage::new(6, 5, 2, 40, 3),
            MbStage::new(6, 3, 2, 80, 4),
            MbStage::new(6, 5, 1, 112, 4),
            MbStage::new(6, 5, 2, 192, 5),
            MbStage::new(6, 3, 1, 320, 2),
        ])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientNet<B> {
        let mut blocks = Vec::new();
        let mut in_channels = self.stem_channels;
        for stage in &self.stages {
            for i in 0..stage.repeats {
                let stride = if i == 0 { stage.stride } else { 1 };
                blocks.push(MbConv::new(
                    in_channels,
                    stage.out_channels,
                    stage.expand_ratio,
                    stage.kernel,
                    stride,
                    device,
                ));
                in_channels = stage.out_channels;
            }
        }

        EfficientNet {
            stem: Conv2dConfig::new([3, self.stem_channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            stem_bn: BatchNormConfig::new(self.stem_channels).init(device),
            blocks,
            top: Conv2dConfig::new([in_channels, self.head_channels], [1, 1])
                .with_bias(false)
                .init(device),
            top_bn: BatchNormConfig::new(self.head_channels).init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

/// Squeeze-and-excitation gate
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.reduce.forward(scale));
        let scale = sigmoid(self.expand.forward(scale));
        x * scale
    }
}

#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    expand: Option<Conv2d<B>>,
    expand_bn: Option<BatchNorm<B>>,
    depthwise: Conv2d<B>,
    depthwise_bn: BatchNorm<B>,
    se: SqueezeExcite<B>,
    project: Conv2d<B>,
    project_bn: BatchNorm<B>,
    residual: bool,
}

impl<B: Backend> MbConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let (expand, expand_bn) = if expand_ratio != 1 {
            (
                Some(
                    Conv2dConfig::new([in_channels, hidden], [1, 1])
                        .with_bias(false)
                        .init(device),
                ),
                Some(BatchNormConfig::new(hidden).init(device)),
            )
        } else {
            (None, None)
        };

        let pad = kernel / 2;
        Self {
            expand,
            expand_bn,
            depthwise: Conv2dConfig::new([hidden, hidden], [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .with_groups(hidden)
                .with_bias(false)
                .init(device),
            depthwise_bn: BatchNormConfig::new(hidden).init(device),
            se: SqueezeExcite::new(hidden, (in_channels / 4).max(1), device),
            project: Conv2dConfig::new([hidden, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            project_bn: BatchNormConfig::new(out_channels).init(device),
            residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let (Some(expand), Some(bn)) = (&self.expand, &self.expand_bn) {
            x = silu(bn.forward(expand.forward(x)));
        }

        let x = silu(self.depthwise_bn.forward(self.depthwise.forward(x)));
        let x = self.se.forward(x);
        let x = self.project_bn.forward(self.project.forward(x));

        if self.residual {
            x + input
        } else {
            x
        }
    }
}

#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B>,
    blocks: Vec<MbConv<B>>,
    top: Conv2d<B>,
    top_bn: BatchNorm<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> EfficientNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = silu(self.stem_bn.forward(self.stem.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = silu(self.top_bn.forward(self.top.forward(x)));
        self.pool.forward(x).flatten(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn test_b1_depth() {
        let config = EfficientNetConfig::b1();
        let blocks: usize = config.stages.iter().map(|s| s.repeats).sum();
        assert_eq!(blocks, 22);
        assert_eq!(config.head_channels, 1280);
    }

    #[test]
    fn test_tiny_extractor_forward() {
        let device = Default::default();
        let config = EfficientNetConfig::new(vec![
            MbStage::new(1, 3, 1, 8, 1),
            MbStage::new(4, 5, 2, 12, 2),
        ])
        .with_stem_channels(8)
        .with_head_channels(32);

        let model = config.init::<NdArray>(&device);
        let out = model.forward(Tensor::zeros([1, 3, 32, 32], &device));
        assert_eq!(out.dims(), [1, 32]);
    }
}
