//! # `NormAct2d` - norm/activation cap.
//!
//! A [`NormAct2d`] module is a [`BatchNorm`] layer followed by a [`Relu`]
//! layer, with no convolution; it caps a residual trunk before pooling and
//! leads every pre-activation convolution.

use bimm_contracts::assert_shape_contract_periodically;
use burn::nn::{BatchNorm, BatchNormConfig, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`NormAct2d`] Config.
#[derive(Config, Debug)]
pub struct NormAct2dConfig {
    /// The normalized feature size.
    pub num_features: usize,
}

impl NormAct2dConfig {
    /// Initialize a [`NormAct2d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NormAct2d<B> {
        NormAct2d {
            norm: BatchNormConfig::new(self.num_features).init(device),
            act: Relu::new(),
        }
    }
}

/// Sequenced norm/activation cap.
#[derive(Module, Debug)]
pub struct NormAct2d<B: Backend> {
    /// Internal Norm layer.
    pub norm: BatchNorm<B, 2>,

    /// Activation layer.
    pub act: Relu,
}

impl<B: Backend> NormAct2d<B> {
    /// The normalized feature size.
    pub fn num_features(&self) -> usize {
        self.norm.gamma.shape().dims[0]
    }

    /// Forward Pass.
    ///
    /// Shape-preserving; `input` channels must equal `num_features`.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        assert_shape_contract_periodically!(
            ["batch", "features", "height", "width"],
            &input,
            &[("features", self.num_features())]
        );

        let x = self.norm.forward(input);
        self.act.forward(x)
    }
}
