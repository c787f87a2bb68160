//! Dense classification head shared by all backbones
//!
//! Layout: dropout → optional hidden Dense + ReLU → optional BatchNorm →
//! dropout → Dense(1). The single output unit is a logit.

use burn::{
    config::Config,
    module::Module,
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{activation::relu, backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct HeadConfig {
    /// Width of the pooled feature vector fed into the head
    pub input_features: usize,
    /// Hidden Dense width, 0 for a direct linear read-out
    #[config(default = "0")]
    pub hidden: usize,
    /// Dropout applied to the features before the hidden layer
    #[config(default = "0.0")]
    pub input_dropout: f64,
    /// Dropout applied before the output unit
    #[config(default = "0.0")]
    pub output_dropout: f64,
    /// BatchNorm after the hidden layer
    #[config(default = "false")]
    pub batch_norm: bool,
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub input_dropout: Dropout,
    pub hidden: Option<Linear<B>>,
    pub norm: Option<BatchNorm<B>>,
    pub output_dropout: Dropout,
    pub output: Linear<B>,
}

impl HeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        let (hidden, out_in) = if self.hidden > 0 {
            (
                Some(LinearConfig::new(self.input_features, self.hidden).init(device)),
                self.hidden,
            )
        } else {
            (None, self.input_features)
        };

        let norm = (self.batch_norm && self.hidden > 0)
            .then(|| BatchNormConfig::new(self.hidden).init(device));

        ClassifierHead {
            input_dropout: DropoutConfig::new(self.input_dropout).init(),
            hidden,
            norm,
            output_dropout: DropoutConfig::new(self.output_dropout).init(),
            output: LinearConfig::new(out_in, 1).init(device),
        }
    }
}

impl<B: Backend> ClassifierHead<B> {
    /// `[batch, features]` → `[batch, 1]` logits
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = self.input_dropout.forward(features);

        if let Some(hidden) = &self.hidden {
            x = relu(hidden.forward(x));
        }

        if let Some(norm) = &self.norm {
            let [batch, width] = x.dims();
            x = norm.forward(x.reshape([batch, width, 1, 1])).reshape([batch, width]);
        }

        let x = self.output_dropout.forward(x);
        self.output.forward(x)
    }

    /// Named weight matrices, used for histogram logging
    pub fn weights(&self) -> Vec<(String, Tensor<B, 2>)> {
        let mut weights = Vec::with_capacity(2);
        if let Some(hidden) = &self.hidden {
            weights.push(("head.hidden.weight".to_string(), hidden.weight.val()));
        }
        weights.push(("head.output.weight".to_string(), self.output.weight.val()));
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_head_outputs_one_logit() {
        let device = Default::default();
        let head = HeadConfig::new(16)
            .with_hidden(8)
            .with_batch_norm(true)
            .with_input_dropout(0.5)
            .init::<TestBackend>(&device);

        let out = head.forward(Tensor::zeros([4, 16], &device));
        assert_eq!(out.dims(), [4, 1]);
        assert_eq!(head.weights().len(), 2);
    }

    #[test]
    fn test_direct_readout_has_no_hidden_layer() {
        let device = Default::default();
        let head = HeadConfig::new(128).init::<TestBackend>(&device);
        assert!(head.hidden.is_none());
        assert!(head.norm.is_none());
        assert_eq!(head.forward(Tensor::ones([2, 128], &device)).dims(), [2, 1]);
    }
}
