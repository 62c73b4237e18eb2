//! # Bottleneck Block for `ResNet`
//!
//! [`BottleneckBlock`] is the 1×1 → 3×3 → 1×1 form of the residual unit:
//! a 1×1 reduction, a 3×3 convolution, and a 1×1 expansion by
//! [`BOTTLENECK_EXPANSION`], with dropout on the expanded residual before
//! the [`Shortcut`] merge.
//!
//! [`BottleneckBlockMeta`] defines a common meta API for
//! [`BottleneckBlock`] and [`BottleneckBlockConfig`].

use crate::layers::blocks::preact_conv::{PreActConv2d, PreActConv2dConfig, PreActConv2dMeta};
use crate::models::resnet::shortcut::{Shortcut, ShortcutConfig};
use crate::models::resnet::util::{
    conv1x1, conv3x3, scalar_to_array, stride_div_output_resolution,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Channel expansion factor of the final 1×1 convolution.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The filter count of the reduction and 3×3 convolutions.
    fn planes(&self) -> usize;

    /// The number of output feature planes.
    ///
    /// ``out_planes = planes * BOTTLENECK_EXPANSION``
    fn out_planes(&self) -> usize {
        self.planes() * BOTTLENECK_EXPANSION
    }

    /// The stride of the reduction convolution.
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

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The filter count of the reduction and 3×3 convolutions.
    pub planes: usize,

    /// The stride of the reduction convolution.
    #[config(default = 1)]
    pub stride: usize,

    /// Suppress the reduction convolution's pre-activation.
    ///
    /// Set on the network's very first block, where a norm/act was just
    /// applied ahead of the stem pool.
    #[config(default = "false")]
    pub skip_first_preact: bool,

    /// Dropout probability, inside pre-activation convolutions and on the
    /// expanded residual.
    #[config(default = "0.2")]
    pub drop_prob: f64,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
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

impl BottleneckBlockConfig {
    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        let out_planes = self.planes * BOTTLENECK_EXPANSION;
        BottleneckBlock {
            conv1: PreActConv2dConfig::new(conv1x1(self.in_planes, self.planes, self.stride))
                .with_drop_prob(self.drop_prob)
                .with_skip_preact(self.skip_first_preact)
                .init(device),
            conv2: PreActConv2dConfig::new(conv3x3(self.planes, self.planes, 1))
                .with_drop_prob(self.drop_prob)
                .init(device),
            conv3: PreActConv2dConfig::new(conv1x1(self.planes, out_planes, 1))
                .with_drop_prob(self.drop_prob)
                .init(device),
            drop: DropoutConfig::new(self.drop_prob).init(),
            shortcut: ShortcutConfig::new(self.in_planes, out_planes)
                .with_stride(scalar_to_array(self.stride))
                .init(device),
        }
    }
}

/// Bottleneck Block for `ResNet`.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// 1×1 reduction convolution; strided, pre-activation optional.
    pub conv1: PreActConv2d<B>,

    /// 3×3 convolution.
    pub conv2: PreActConv2d<B>,

    /// 1×1 expansion convolution.
    pub conv3: PreActConv2d<B>,

    /// Dropout on the expanded residual.
    pub drop: Dropout,

    /// Residual merge.
    pub shortcut: Shortcut<B>,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv3.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*4, out_height, out_width]`` tensor.
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
        let x = self.conv2.forward(x);
        let residual = self.conv3.forward(x);
        let residual = self.drop.forward(residual);
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
