//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is two 3×3 pre-activation convolutions and a
//! [`Shortcut`] merge.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].

use crate::layers::blocks::preact_conv::{PreActConv2d, PreActConv2dConfig, PreActConv2dMeta};
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig};
use crate::models::resnet::util::{conv3x3, scalar_to_array, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The filter count of both convolutions.
    fn planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize {
        self.planes()
    }

    /// The stride of the first convolution.
    ///
    /// Affects the shortcut projection.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: \
    ///   ``[in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The filter count of both convolutions.
    pub planes: usize,

    /// The stride of the first convolution.
    #[config(default = 1)]
    pub stride: usize,

    /// Suppress the first convolution's pre-activation.
    ///
    /// Set on the network's very first block, where a norm/act was just
    /// applied ahead of the stem pool.
    #[config(default = "false")]
    pub skip_first_preact: bool,

    /// Dropout probability inside pre-activation convolutions.
    #[config(default = "0.2")]
    pub drop_prob: f64,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        BasicBlock {
            conv1: PreActConv2dConfig::new(conv3x3(self.in_planes, self.planes, self.stride))
                .with_drop_prob(self.drop_prob)
                .with_skip_preact(self.skip_first_preact)
                .init(device),
            conv2: PreActConv2dConfig::new(conv3x3(self.planes, self.planes, 1))
                .with_drop_prob(self.drop_prob)
                .init(device),
            shortcut: ShortcutConfig::new(self.in_planes, self.planes)
                .with_stride(scalar_to_array(self.stride))
                .init(device),
        }
    }
}

/// Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First 3×3 convolution; strided, pre-activation optional.
    pub conv1: PreActConv2d<B>,

    /// Second 3×3 convolution.
    pub conv2: PreActConv2d<B>,

    /// Residual merge.
    pub shortcut: Shortcut<B>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let x = self.conv1.forward(input.clone());
        let residual = self.conv2.forward(x);
        let out = self.shortcut.forward(input, residual);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        out
    }
}
