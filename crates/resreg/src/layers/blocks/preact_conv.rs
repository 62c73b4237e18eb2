//! # `PreActConv2d` - pre-activation convolution block.
//!
//! A [`PreActConv2d`] module is:
//! * a [`NormAct2d`] layer,
//! * a [`Dropout`] layer,
//! * a [`Conv2d`] layer,
//!
//! in that order; the "pre-activation" scheme of
//! <https://arxiv.org/abs/1603.05027>.
//!
//! The leading norm/act/dropout can be suppressed with
//! [`PreActConv2dConfig::skip_preact`], leaving a bare convolution; the
//! first block of a network does this when a norm/act was just applied
//! upstream.

use crate::layers::blocks::norm_act::{NormAct2d, NormAct2dConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PreActConv2d`] Meta.
pub trait PreActConv2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Whether the leading norm/act/dropout is present.
    fn has_preact(&self) -> bool;
}

/// [`PreActConv2d`] Config.
///
/// Implements [`PreActConv2dMeta`].
#[derive(Config, Debug)]
pub struct PreActConv2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// Dropout probability between activation and convolution.
    #[config(default = "0.2")]
    pub drop_prob: f64,

    /// Suppress the leading norm/act/dropout.
    #[config(default = "false")]
    pub skip_preact: bool,
}

impl From<Conv2dConfig> for PreActConv2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl PreActConv2dMeta for PreActConv2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn has_preact(&self) -> bool {
        !self.skip_preact
    }
}

impl PreActConv2dConfig {
    /// Initialize a [`PreActConv2d`].
    ///
    /// The norm features match the conv *input* channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> PreActConv2d<B> {
        let features = self.conv.channels[0];
        PreActConv2d {
            preact: (!self.skip_preact).then(|| NormAct2dConfig::new(features).init(device)),
            drop: (!self.skip_preact).then(|| DropoutConfig::new(self.drop_prob).init()),
            conv: self.conv.init(device),
        }
    }
}

/// Pre-activation convolution block.
///
/// Implements [`PreActConv2dMeta`].
#[derive(Module, Debug)]
pub struct PreActConv2d<B: Backend> {
    /// Optional leading norm/act.
    pub preact: Option<NormAct2d<B>>,

    /// Optional dropout between activation and convolution.
    pub drop: Option<Dropout>,

    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,
}

impl<B: Backend> PreActConv2dMeta for PreActConv2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn has_preact(&self) -> bool {
        self.preact.is_some()
    }
}

impl<B: Backend> PreActConv2d<B> {
    /// Forward Pass.
    ///
    /// Applies norm/act/dropout (when present), then the convolution:
    ///
    /// ```rust,ignore
    /// let x = self.preact.forward(input);
    /// let x = self.drop.forward(x);
    /// return self.conv.forward(x);
    /// ```
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = match &self.preact {
            Some(preact) => preact.forward(input),
            None => input,
        };
        let x = match &self.drop {
            Some(drop) => drop.forward(x),
            None => x,
        };
        let x = self.conv.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
