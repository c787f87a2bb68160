//! Xception: entry, middle and exit flows of depthwise-separable convolutions

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

#[derive(Config, Debug)]
pub struct XceptionConfig {
    /// Two plain convolutions before the separable blocks
    pub stem_channels: Vec<usize>,
    /// Output channels of each strided entry-flow block
    pub entry_channels: Vec<usize>,
    /// Number of residual middle-flow blocks
    pub middle_blocks: usize,
    /// Exit-flow widths: the strided block, then two separable convolutions
    pub exit_channels: Vec<usize>,
    #[config(default = "10")]
    pub head_hidden: usize,
    #[config(default = "0.5")]
    pub head_dropout: f64,
}

impl XceptionConfig {
    pub fn standard() -> Self {
        Self::new(vec![32, 64], vec![128, 256, 728], 8, vec![1024, 1536, 2048])
    }

    pub fn output_features(&self) -> usize {
        self.exit_channels.last().copied().unwrap_or(0)
    }

    /// Shape errors are reported before any layer is allocated
    pub fn check(&self) -> Result<(), String> {
        if self.stem_channels.len() != 2 {
            return Err(format!("stem_channels needs 2 entries, got {}", self.stem_channels.len()));
        }
        if self.entry_channels.is_empty() {
            return Err("entry_channels must not be empty".to_string());
        }
        if self.exit_channels.len() != 3 {
            return Err(format!("exit_channels needs 3 entries, got {}", self.exit_channels.len()));
        }
        Ok(())
    }

    /// Build the network. Call [`XceptionConfig::check`] first.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Xception<B> {
        let stem1 = Conv2dConfig::new([3, self.stem_channels[0]], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem2 = Conv2dConfig::new([self.stem_channels[0], self.stem_channels[1]], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        let mut in_channels = self.stem_channels[1];
        let mut entry = Vec::with_capacity(self.entry_channels.len());
        for (i, &out) in self.entry_channels.iter().enumerate() {
            entry.push(StridedBlock::new(in_channels, out, out, i > 0, device));
            in_channels = out;
        }

        let middle = (0..self.middle_blocks)
            .map(|_| MiddleBlock::new(in_channels, device))
            .collect();

        let exit_block = StridedBlock::new(
            in_channels,
            in_channels,
            self.exit_channels[0],
            true,
            device,
        );

        Xception {
            stem1,
            stem1_bn: BatchNormConfig::new(self.stem_channels[0]).init(device),
            stem2,
            stem2_bn: BatchNormConfig::new(self.stem_channels[1]).init(device),
            entry,
            middle,
            exit_block,
            exit_sep1: SeparableConv::new(self.exit_channels[0], self.exit_channels[1], device),
            exit_bn1: BatchNormConfig::new(self.exit_channels[1]).init(device),
            exit_sep2: SeparableConv::new(self.exit_channels[1], self.exit_channels[2], device),
            exit_bn2: BatchNormConfig::new(self.exit_channels[2]).init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

/// Depthwise 3x3 followed by pointwise 1x1
#[derive(Module, Debug)]
pub struct SeparableConv<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
}

impl<B: Backend> SeparableConv<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            depthwise: Conv2dConfig::new([in_channels, in_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(in_channels)
                .with_bias(false)
                .init(device),
            pointwise: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// Two separable convolutions, a strided max-pool and a 1x1 strided shortcut
#[derive(Module, Debug)]
pub struct StridedBlock<B: Backend> {
    sep1: SeparableConv<B>,
    bn1: BatchNorm<B>,
    sep2: SeparableConv<B>,
    bn2: BatchNorm<B>,
    pool: MaxPool2d,
    shortcut: Conv2d<B>,
    shortcut_bn: BatchNorm<B>,
    pre_activation: bool,
}

impl<B: Backend> StridedBlock<B> {
    fn new(
        in_channels: usize,
        mid_channels: usize,
        out_channels: usize,
        pre_activation: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            sep1: SeparableConv::new(in_channels, mid_channels, device),
            bn1: BatchNormConfig::new(mid_channels).init(device),
            sep2: SeparableConv::new(mid_channels, out_channels, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            shortcut: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([2, 2])
                .with_bias(false)
                .init(device),
            shortcut_bn: BatchNormConfig::new(out_channels).init(device),
            pre_activation,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = self.shortcut_bn.forward(self.shortcut.forward(input.clone()));

        let x = if self.pre_activation { relu(input) } else { input };
        let x = self.bn1.forward(self.sep1.forward(x));
        let x = self.bn2.forward(self.sep2.forward(relu(x)));
        self.pool.forward(x) + shortcut
    }
}

/// Three ReLU → separable conv → BatchNorm units with an identity shortcut
#[derive(Module, Debug)]
pub struct MiddleBlock<B: Backend> {
    convs: Vec<SeparableConv<B>>,
    norms: Vec<BatchNorm<B>>,
}

impl<B: Backend> MiddleBlock<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            convs: (0..3).map(|_| SeparableConv::new(channels, channels, device)).collect(),
            norms: (0..3).map(|_| BatchNormConfig::new(channels).init(device)).collect(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        for (conv, norm) in self.convs.iter().zip(&self.norms) {
            x = norm.forward(conv.forward(relu(x)));
        }
        x + input
    }
}

#[derive(Module, Debug)]
pub struct Xception<B: Backend> {
    stem1: Conv2d<B>,
    stem1_bn: BatchNorm<B>,
    stem2: Conv2d<B>,
    stem2_bn: BatchNorm<B>,
    entry: Vec<StridedBlock<B>>,
    middle: Vec<MiddleBlock<B>>,
    exit_block: StridedBlock<B>,
    exit_sep1: SeparableConv<B>,
    exit_bn1: BatchNorm<B>,
    exit_sep2: SeparableConv<B>,
    exit_bn2: BatchNorm<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Xception<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem1_bn.forward(self.stem1.forward(images)));
        let mut x = relu(self.stem2_bn.forward(self.stem2.forward(x)));

        for block in &self.entry {
            x = block.forward(x);
        }
        for block in &self.middle {
            x = block.forward(x);
        }

        let x = self.exit_block.forward(x);
        let x = relu(self.exit_bn1.forward(self.exit_sep1.forward(x)));
        let x = relu(self.exit_bn2.forward(self.exit_sep2.forward(x)));
        self.pool.forward(x).flatten(1, 3)
    }

    /// Freeze everything except, optionally, the exit flow
    pub fn freeze(self, train_exit_flow: bool) -> Self {
        let exit = |m: SeparableConv<B>| if train_exit_flow { m } else { m.no_grad() };
        let exit_bn = |m: BatchNorm<B>| if train_exit_flow { m } else { m.no_grad() };

        Self {
            stem1: self.stem1.no_grad(),
            stem1_bn: self.stem1_bn.no_grad(),
            stem2: self.stem2.no_grad(),
            stem2_bn: self.stem2_bn.no_grad(),
            entry: self.entry.into_iter().map(|b| b.no_grad()).collect(),
            middle: self.middle.into_iter().map(|b| b.no_grad()).collect(),
            exit_block: if train_exit_flow {
                self.exit_block
            } else {
                self.exit_block.no_grad()
            },
            exit_sep1: exit(self.exit_sep1),
            exit_bn1: exit_bn(self.exit_bn1),
            exit_sep2: exit(self.exit_sep2),
            exit_bn2: exit_bn(self.exit_bn2),
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

    fn values<const D: usize>(tensor: Tensor<TrainBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn changed(before: &[f32], after: &[f32]) -> bool {
        before.iter().zip(after).any(|(a, b)| (a - b).abs() > 1e-7)
    }

    /// Stem, middle flow, exit flow and head hidden weights
    fn snapshot(model: &LesionClassifier<TrainBackend>) -> [Vec<f32>; 4] {
        let LesionBackbone::Xception(xception) = &model.backbone else {
            panic!("expected an Xception backbone");
        };
        let hidden = model.head.hidden.as_ref().expect("xception head has a hidden layer");
        [
            values(xception.stem1.weight.val()),
            values(xception.middle[0].convs[0].pointwise.weight.val()),
            values(xception.exit_sep2.pointwise.weight.val()),
            values(hidden.weight.val()),
        ]
    }

    fn train_once(trainable: bool) -> ([Vec<f32>; 4], [Vec<f32>; 4]) {
        let device = Default::default();
        let config = ClassifierConfig::new(
            Architecture::Xception(
                XceptionConfig::new(vec![4, 8], vec![8, 16], 1, vec![16, 24, 32]).with_head_dropout(0.0),
            ),
            64,
            64,
        );
        let model = config
            .init::<TrainBackend>(&device)
            .freeze_backbone(trainable, config.fine_tune_from());
        let before = snapshot(&model);

        let images = Tensor::<TrainBackend, 4>::random([4, 3, 64, 64], Distribution::Uniform(0.0, 1.0), &device);
        let targets = Tensor::<TrainBackend, 1>::from_data(TensorData::new(vec![0.0f32, 1.0, 0.0, 1.0], [4]), &device);
        let logits = model.forward(images).flatten::<1>(0, 1);
        let grads = GradientsParams::from_grads(bce_with_logits(logits, targets).backward(), &model);
        let mut optimizer = AdamConfig::new().init::<TrainBackend, LesionClassifier<TrainBackend>>();
        let model = optimizer.step(1e-2, model, grads);

        (before, snapshot(&model))
    }

    #[test]
    fn test_standard_shape_checks() {
        let config = XceptionConfig::standard();
        assert!(config.check().is_ok());
        assert_eq!(config.output_features(), 2048);

        let broken = XceptionConfig::new(vec![32], vec![128], 1, vec![64, 64, 64]);
        assert!(broken.check().is_err());
    }

    #[test]
    fn test_tiny_forward() {
        let device = Default::default();
        let config = XceptionConfig::new(vec![4, 8], vec![8, 16], 2, vec![16, 24, 32]);
        let model = config.init::<NdArray>(&device).freeze(true);

        let out = model.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(out.dims(), [2, 32]);
    }

    #[test]
    fn test_frozen_flows_keep_weights() {
        let (before, after) = train_once(false);
        assert!(!changed(&before[0], &after[0]), "stem moved");
        assert!(!changed(&before[1], &after[1]), "middle flow moved");
        assert!(!changed(&before[2], &after[2]), "exit flow moved");
        assert!(changed(&before[3], &after[3]), "head did not train");
    }

    #[test]
    fn test_trainable_opens_exit_flow_only() {
        let (before, after) = train_once(true);
        assert!(!changed(&before[0], &after[0]), "stem moved");
        assert!(!changed(&before[1], &after[1]), "middle flow moved");
        assert!(changed(&before[2], &after[2]), "exit flow did not train");
        assert!(changed(&before[3], &after[3]), "head did not train");
    }
}
