//! Compact CNN trained from scratch
//!
//! Sized for small low-resolution lesion crops. All convolutions use valid
//! padding, so the flattened feature width depends on the input size and is
//! computed by [`CompactCnnConfig::feature_map`].

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

/// Configuration for the compact CNN
#[derive(Config, Debug)]
pub struct CompactCnnConfig {
    /// Input image height
    pub height: usize,
    /// Input image width
    pub width: usize,
    /// Dropout after the first dense block
    #[config(default = "0.1")]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct CompactCnn<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    bn1: BatchNorm<B>,
    pool1: MaxPool2d,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    conv5: Conv2d<B>,
    pool2: MaxPool2d,
    conv6: Conv2d<B>,
    fc1: Linear<B>,
    bn2: BatchNorm<B>,
    dropout: Dropout,
    fc2: Linear<B>,
}

/// Channel count after the last convolution
const LAST_CONV_CHANNELS: usize = 10;
/// Width of the feature vector handed to the classification head
pub const COMPACT_FEATURES: usize = 128;

impl CompactCnnConfig {
    /// Spatial size after the conv stack, or None if the input is too small
    pub fn feature_map(&self) -> Option<(usize, usize)> {
        fn shrink(size: usize) -> Option<usize> {
            let size = size.checked_sub(4)?.checked_sub(2)? / 2;
            let size = size.checked_sub(6)? / 2;
            let size = size.checked_sub(2)?;
            (size > 0).then_some(size)
        }
        Some((shrink(self.height)?, shrink(self.width)?))
    }

    /// Flattened width entering the first dense layer
    pub fn flat_features(&self) -> Option<usize> {
        self.feature_map().map(|(h, w)| LAST_CONV_CHANNELS * h * w)
    }

    /// Build the network. Callers validate the input size first.
    pub fn init<B: Backend>(&self, device: &B::Device) -> CompactCnn<B> {
        let conv = |cin: usize, cout: usize, k: usize| {
            Conv2dConfig::new([cin, cout], [k, k])
                .with_padding(PaddingConfig2d::Valid)
                .init(device)
        };
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let flat = self.flat_features().unwrap_or(LAST_CONV_CHANNELS);

        CompactCnn {
            conv1: conv(3, 30, 5),
            conv2: conv(30, 30, 3),
            bn1: BatchNormConfig::new(30).init(device),
            pool1: pool(),
            conv3: conv(30, 20, 3),
            conv4: conv(20, 15, 3),
            conv5: conv(15, 15, 3),
            pool2: pool(),
            conv6: conv(15, LAST_CONV_CHANNELS, 3),
            fc1: LinearConfig::new(flat, 256).init(device),
            bn2: BatchNormConfig::new(256).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(256, COMPACT_FEATURES).init(device),
        }
    }
}

impl<B: Backend> CompactCnn<B> {
    /// `[batch, 3, H, W]` → `[batch, 128]` features
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.pool1.forward(self.bn1.forward(x));

        let x = relu(self.conv3.forward(x));
        let x = relu(self.conv4.forward(x));
        let x = relu(self.conv5.forward(x));
        let x = self.pool2.forward(x);

        let x = relu(self.conv6.forward(x));
        let x: Tensor<B, 2> = x.flatten(1, 3);

        let x = relu(self.fc1.forward(x));
        let [batch, width] = x.dims();
        let x = self
            .bn2
            .forward(x.reshape([batch, width, 1, 1]))
            .reshape([batch, width]);
        let x = self.dropout.forward(x);
        relu(self.fc2.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn test_feature_map_default_size() {
        let config = CompactCnnConfig::new(120, 90);
        assert_eq!(config.feature_map(), Some((23, 16)));
        assert_eq!(config.flat_features(), Some(10 * 23 * 16));
    }

    #[test]
    fn test_feature_map_minimum_size() {
        assert_eq!(CompactCnnConfig::new(30, 30).feature_map(), Some((1, 1)));
        assert_eq!(CompactCnnConfig::new(29, 64).feature_map(), None);
        assert_eq!(CompactCnnConfig::new(4, 4).feature_map(), None);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = CompactCnnConfig::new(32, 36).init::<NdArray>(&device);
        let out = model.forward(Tensor::zeros([2, 3, 32, 36], &device));
        assert_eq!(out.dims(), [2, COMPACT_FEATURES]);
    }
}
