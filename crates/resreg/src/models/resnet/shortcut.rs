//! # Residual shortcut connection.
//!
//! [`Shortcut`] merges a block input with its residual branch by
//! element-wise sum. When the branches disagree (a spatial stride ratio
//! above 1 on either axis, or differing channel counts) the input is
//! first projected through a strided 1×1 valid-padding convolution with
//! the residual's channel count and no activation. Otherwise the input
//! passes through unchanged.

use crate::models::resnet::util::{CONV_INTO_RELU_INITIALIZER, rounded_stride_ratio};
use bimm_contracts::assert_shape_contract_periodically;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Shortcut`] Meta.
pub trait ShortcutMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of residual (output) feature planes.
    fn out_planes(&self) -> usize;

    /// Per-axis stride ratio between input and residual.
    fn stride(&self) -> [usize; 2];

    /// Whether the input branch requires a projection.
    ///
    /// True iff the stride exceeds 1 on either axis or the channel counts
    /// differ.
    fn is_projection(&self) -> bool {
        let [stride_h, stride_w] = self.stride();
        stride_h > 1 || stride_w > 1 || self.in_planes() != self.out_planes()
    }
}

/// [`Shortcut`] Config.
///
/// Implements [`ShortcutMeta`].
#[derive(Config, Debug)]
pub struct ShortcutConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The number of residual feature planes.
    pub out_planes: usize,

    /// Per-axis stride ratio between input and residual.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],
}

impl ShortcutMeta for ShortcutConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }
}

impl ShortcutConfig {
    /// Derive a shortcut config from branch shapes.
    ///
    /// # Arguments
    ///
    /// - `input_shape`: ``[channels, height, width]`` of the block input.
    /// - `residual_shape`: ``[channels, height, width]`` of the residual.
    ///
    /// The stride ratio is rounded to the nearest integer per axis.
    pub fn between(
        input_shape: [usize; 3],
        residual_shape: [usize; 3],
    ) -> Self {
        let [in_channels, in_height, in_width] = input_shape;
        let [res_channels, res_height, res_width] = residual_shape;
        Self::new(in_channels, res_channels)
            .with_stride(rounded_stride_ratio([in_height, in_width], [res_height, res_width]))
    }

    /// Initialize a [`Shortcut`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Shortcut<B> {
        Shortcut {
            proj: self.is_projection().then(|| {
                Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                    .with_stride(self.stride)
                    .with_padding(PaddingConfig2d::Valid)
                    .with_initializer(CONV_INTO_RELU_INITIALIZER.clone())
                    .init(device)
            }),
        }
    }
}

/// Residual merge layer.
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    /// Optional 1×1 projection for the input branch.
    pub proj: Option<Conv2d<B>>,
}

impl<B: Backend> Shortcut<B> {
    /// Whether the input branch is projected.
    pub fn is_projection(&self) -> bool {
        self.proj.is_some()
    }

    /// Merge `input` and `residual`.
    ///
    /// # Arguments
    ///
    /// - `input`: the block input, ``[batch, in_planes, in_height, in_width]``.
    /// - `residual`: the residual branch, ``[batch, out_planes, out_height, out_width]``.
    ///
    /// # Returns
    ///
    /// The element-wise sum, shaped exactly like `residual`.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        residual: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_planes, out_height, out_width] = residual.dims();

        let shortcut = match &self.proj {
            Some(proj) => proj.forward(input),
            None => input,
        };

        // the sum requires exact shape agreement
        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &shortcut,
            &[
                ("batch", batch),
                ("out_planes", out_planes),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        shortcut + residual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_shortcut_projection_rule() {
        // neither trigger: identity
        let config = ShortcutConfig::between([16, 32, 32], [16, 32, 32]);
        assert_eq!(config.stride(), [1, 1]);
        assert!(!config.is_projection());

        // spatial trigger alone
        let config = ShortcutConfig::between([16, 32, 32], [16, 16, 16]);
        assert_eq!(config.stride(), [2, 2]);
        assert!(config.is_projection());

        // channel trigger alone
        let config = ShortcutConfig::between([16, 32, 32], [32, 32, 32]);
        assert_eq!(config.stride(), [1, 1]);
        assert!(config.is_projection());

        // both triggers
        let config = ShortcutConfig::between([16, 32, 32], [64, 16, 16]);
        assert_eq!(config.stride(), [2, 2]);
        assert!(config.is_projection());

        // single-axis spatial trigger
        let config = ShortcutConfig::between([16, 32, 32], [16, 32, 16]);
        assert_eq!(config.stride(), [1, 2]);
        assert!(config.is_projection());
    }

    #[test]
    fn test_shortcut_identity_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Shortcut<B> = ShortcutConfig::new(4, 4).init(&device);
        assert!(!shortcut.is_projection());

        let input = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let residual = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);

        let output = shortcut.forward(input.clone(), residual.clone());
        let expected = input + residual;
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_shortcut_projection_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: Shortcut<B> = ShortcutConfig::between([4, 8, 8], [8, 4, 4]).init(&device);
        assert!(shortcut.is_projection());

        let input = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let residual = Tensor::random([2, 8, 4, 4], Distribution::Default, &device);

        let output = shortcut.forward(input.clone(), residual.clone());
        assert_eq!(output.dims(), [2, 8, 4, 4]);

        let proj = shortcut.proj.as_ref().unwrap();
        let expected = proj.forward(input) + residual;
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
