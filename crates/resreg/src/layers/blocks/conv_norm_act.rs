//! # `ConvNormAct2d` - conv/norm/activation block.
//!
//! A [`ConvNormAct2d`] module is:
//! * a [`Conv2d`] layer,
//! * a [`BatchNorm`] layer,
//! * a [`Relu`] layer.
//!
//! [`ConvNormAct2dMeta`] defines a common meta API for [`ConvNormAct2d`]
//! and [`ConvNormAct2dConfig`].

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvNormAct2d`] Meta.
pub trait ConvNormAct2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];
}

/// [`ConvNormAct2d`] Config.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Config, Debug)]
pub struct ConvNormAct2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,
}

impl From<Conv2dConfig> for ConvNormAct2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self { conv }
    }
}

impl ConvNormAct2dMeta for ConvNormAct2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl ConvNormAct2dConfig {
    /// Initialize a [`ConvNormAct2d`].
    ///
    /// The norm features match the conv output channels; the conv runs
    /// bias-free, the norm owns the shift.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNormAct2d<B> {
        let features = self.conv.channels[1];
        ConvNormAct2d {
            conv: self.conv.with_bias(false).init(device),
            norm: BatchNormConfig::new(features).init(device),
            act: Relu::new(),
        }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Module, Debug)]
pub struct ConvNormAct2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm layer.
    pub norm: BatchNorm<B, 2>,

    /// Activation layer.
    pub act: Relu,
}

impl<B: Backend> ConvNormAct2dMeta for ConvNormAct2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> ConvNormAct2d<B> {
    /// Forward Pass.
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

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = self.act.forward(x);

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
