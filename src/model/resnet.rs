//! Bottleneck ResNet feature extractor
//!
//! `ResNetConfig::resnet152()` gives the 3/8/36/3 layout. Blocks are kept in
//! one flat list so fine-tuning can unfreeze "every block from index N".

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

const EXPANSION: usize = 4;

#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Bottleneck blocks per stage
    pub layers: Vec<usize>,
    /// Channels of the stem and of the first stage's bottleneck
    #[config(default = "64")]
    pub base_width: usize,
    /// Hidden width of the dense head
    #[config(default = "100")]
    pub head_hidden: usize,
    /// Dropout between the hidden layer and the output unit
    #[config(default = "0.25")]
    pub head_dropout: f64,
}

impl ResNetConfig {
    pub fn resnet152() -> Self {
        Self::new(vec![3, 8, 36, 3])
    }

    pub fn resnet50() -> Self {
        Self::new(vec![3, 4, 6, 3])
    }

    /// Width of the pooled feature vector
    pub fn output_features(&self) -> usize {
        self.base_width * (1 << self.layers.len().saturating_sub(1)) * EXPANSION
    }

    /// Index of the first block of the last stage
    pub fn last_stage_start(&self) -> usize {
        self.layers.iter().rev().skip(1).sum()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem = Conv2dConfig::new([3, self.base_width], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);

        let mut blocks = Vec::with_capacity(self.layers.iter().sum());
        let mut in_channels = self.base_width;
        for (stage, &count) in self.layers.iter().enumerate() {
            let width = self.base_width << stage;
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(Bottleneck::new(in_channels, width, stride, device));
                in_channels = width * EXPANSION;
            }
        }

        ResNet {
            stem,
            stem_bn: BatchNormConfig::new(self.base_width).init(device),
            stem_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

/// 1x1 projection used when a block changes shape
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
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
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * EXPANSION;
        let conv1x1 = |cin: usize, cout: usize, stride: usize| {
            Conv2dConfig::new([cin, cout], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device)
        };

        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: conv1x1(in_channels, out_channels, stride),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: conv1x1(in_channels, width, 1),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: Conv2dConfig::new([width, width], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: conv1x1(width, out_channels, 1),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(input.clone())),
            None => input.clone(),
        };

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        let x = self.bn3.forward(self.conv3.forward(x));

        relu(x + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B>,
    stem_pool: MaxPool2d,
    blocks: Vec<Bottleneck<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet<B> {
    /// `[batch, 3, H, W]` → `[batch, features]` after global average pooling
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem_bn.forward(self.stem.forward(images)));
        let mut x = self.stem_pool.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        self.pool.forward(x).flatten(1, 3)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Freeze the stem and every block before `trainable_from`.
    /// `None` freezes the whole backbone.
    pub fn freeze(self, trainable_from: Option<usize>) -> Self {
        let limit = trainable_from.unwrap_or(usize::MAX);
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < limit { block.no_grad() } else { block })
            .collect();

        Self {
            stem: self.stem.no_grad(),
            stem_bn: self.stem_bn.no_grad(),
            stem_pool: self.stem_pool,
            blocks,
            pool: self.pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classifier::{Architecture, ClassifierConfig, LesionBackbone, LesionClassifier};
    use crate::training::trainer::bce_with_logits;
    use burn::backend::Autodiff;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type TrainBackend = Autodiff<NdArray>;

    fn adam_step(model: LesionClassifier<TrainBackend>) -> LesionClassifier<TrainBackend> {
        let device = Default::default();
        let images = Tensor::<TrainBackend, 4>::random([4, 3, 64, 64], Distribution::Uniform(0.0, 1.0), &device);
        let targets = Tensor::<TrainBackend, 1>::from_data(TensorData::new(vec![0.0f32, 1.0, 0.0, 1.0], [4]), &device);

        let logits = model.forward(images).flatten::<1>(0, 1);
        let grads = GradientsParams::from_grads(bce_with_logits(logits, targets).backward(), &model);
        let mut optimizer = AdamConfig::new().init::<TrainBackend, LesionClassifier<TrainBackend>>();
        optimizer.step(1e-2, model, grads)
    }

    fn values<const D: usize>(tensor: Tensor<TrainBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn changed(before: &[f32], after: &[f32]) -> bool {
        before.iter().zip(after).any(|(a, b)| (a - b).abs() > 1e-7)
    }

    /// Stem, first block, last block and head output weights
    fn snapshot(model: &LesionClassifier<TrainBackend>) -> [Vec<f32>; 4] {
        let LesionBackbone::ResNet(resnet) = &model.backbone else {
            panic!("expected a ResNet backbone");
        };
        [
            values(resnet.stem.weight.val()),
            values(resnet.blocks[0].conv1.weight.val()),
            values(resnet.blocks[resnet.blocks.len() - 1].conv1.weight.val()),
            values(model.head.output.weight.val()),
        ]
    }

    fn tiny_classifier(trainable: bool) -> LesionClassifier<TrainBackend> {
        let device = Default::default();
        let config = ClassifierConfig::new(
            Architecture::ResNet(ResNetConfig::new(vec![1, 1]).with_base_width(4)),
            64,
            64,
        );
        config
            .init::<TrainBackend>(&device)
            .freeze_backbone(trainable, config.fine_tune_from())
    }

    #[test]
    fn test_resnet152_layout() {
        let config = ResNetConfig::resnet152();
        assert_eq!(config.layers.iter().sum::<usize>(), 50);
        assert_eq!(config.output_features(), 2048);
        assert_eq!(config.last_stage_start(), 47);
    }

    #[test]
    fn test_tiny_resnet_forward() {
        let device = Default::default();
        let config = ResNetConfig::new(vec![1, 1, 1, 1]).with_base_width(4);
        let model = config.init::<NdArray>(&device);

        assert_eq!(model.num_blocks(), 4);
        let out = model.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(out.dims(), [2, config.output_features()]);
    }

    #[test]
    fn test_frozen_backbone_keeps_weights() {
        let model = tiny_classifier(false);
        let before = snapshot(&model);
        let after = snapshot(&adam_step(model));

        assert!(!changed(&before[0], &after[0]), "stem moved");
        assert!(!changed(&before[1], &after[1]), "first block moved");
        assert!(!changed(&before[2], &after[2]), "last block moved");
        assert!(changed(&before[3], &after[3]), "head did not train");
    }

    #[test]
    fn test_fine_tuning_opens_last_stage_only() {
        let model = tiny_classifier(true);
        let before = snapshot(&model);
        let after = snapshot(&adam_step(model));

        assert!(!changed(&before[0], &after[0]), "stem moved");
        assert!(!changed(&before[1], &after[1]), "block before the last stage moved");
        assert!(changed(&before[2], &after[2]), "last stage did not train");
        assert!(changed(&before[3], &after[3]), "head did not train");
    }
}
