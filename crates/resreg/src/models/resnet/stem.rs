//! # Input Stems
//!
//! A [`Stem`] is the fixed sequence of layers processing raw input before
//! the residual stages: a run of [`ConvNormAct2d`] blocks, a max-pool, and
//! a dropout.
//!
//! Each supported input shape has its own hand-tuned stem, held as data in
//! [`STEM_TABLE`]. Shapes without a table entry are unsupported; adding a
//! shape means adding an entry, not generalizing a fallback.

use crate::layers::blocks::conv_norm_act::{
    ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta,
};
use crate::models::resnet::dim_order::ImageShape;
use crate::models::resnet::util::{conv3x3, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Stem`] Meta API.
pub trait StemMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// The effective stride of the stem.
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

/// [`Stem`] Config.
///
/// Implements [`StemMeta`]; must hold at least one conv.
#[derive(Config, Debug)]
pub struct StemConfig {
    /// The conv/norm/act sequence.
    pub convs: Vec<ConvNormAct2dConfig>,

    /// The pooling layer.
    pub pool: MaxPool2dConfig,

    /// Dropout probability after pooling.
    #[config(default = "0.2")]
    pub drop_prob: f64,
}

impl StemMeta for StemConfig {
    fn in_channels(&self) -> usize {
        self.convs[0].in_channels()
    }

    fn out_channels(&self) -> usize {
        self.convs[self.convs.len() - 1].out_channels()
    }

    fn stride(&self) -> usize {
        self.convs
            .iter()
            .fold(1, |acc, conv| acc * conv.stride()[0])
            * self.pool.strides[0]
    }
}

impl StemConfig {
    /// Initialize a [`Stem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Stem<B> {
        let stride = self.stride();
        Stem {
            convs: self
                .convs
                .into_iter()
                .map(|conv| conv.init(device))
                .collect(),
            pool: self.pool.init(),
            drop: DropoutConfig::new(self.drop_prob).init(),
            stride,
        }
    }
}

/// Input stem.
///
/// Implements [`StemMeta`].
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    /// The conv/norm/act sequence.
    pub convs: Vec<ConvNormAct2d<B>>,

    /// The pooling layer.
    pub pool: MaxPool2d,

    /// Post-pool dropout.
    pub drop: Dropout,

    /// Effective stride, conv strides times pool stride.
    pub stride: usize,
}

impl<B: Backend> StemMeta for Stem<B> {
    fn in_channels(&self) -> usize {
        self.convs[0].in_channels()
    }

    fn out_channels(&self) -> usize {
        self.convs[self.convs.len() - 1].out_channels()
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl<B: Backend> Stem<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride())
            ],
        );

        let x = self.convs.iter().fold(input, |x, conv| conv.forward(x));
        let x = self.pool.forward(x);
        let x = self.drop.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

/// A well-known stem for one supported input shape.
pub struct StaticStemEntry {
    /// Supported rows.
    pub rows: usize,

    /// Supported cols.
    pub cols: usize,

    /// Supported channels.
    pub channels: usize,

    /// Filter count of the first residual stage.
    pub base_planes: usize,

    /// Stem config builder.
    pub builder: fn() -> StemConfig,
}

impl StaticStemEntry {
    /// Whether this entry covers `shape`.
    pub fn matches(
        &self,
        shape: &ImageShape,
    ) -> bool {
        self.rows == shape.rows && self.cols == shape.cols && self.channels == shape.channels
    }

    /// Build the stem config.
    pub fn to_config(&self) -> StemConfig {
        (self.builder)()
    }
}

fn stem_pool() -> MaxPool2dConfig {
    MaxPool2dConfig::new([3, 3])
        .with_strides([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
}

/// 128×128 grayscale stem; kernel and filter sizes hand-tuned for
/// regression inputs at this resolution.
fn stem_128() -> StemConfig {
    StemConfig::new(
        vec![
            conv3x3(1, 64, 2).into(),
            conv3x3(64, 64, 1).into(),
            conv3x3(64, 128, 1).into(),
        ],
        stem_pool(),
    )
}

/// 256×256 grayscale stem; two strided convolutions before the pool.
fn stem_256() -> StemConfig {
    StemConfig::new(
        vec![conv3x3(1, 64, 2).into(), conv3x3(64, 64, 2).into()],
        stem_pool(),
    )
}

/// The supported-input-shape table.
pub static STEM_TABLE: &[StaticStemEntry] = &[
    StaticStemEntry {
        rows: 128,
        cols: 128,
        channels: 1,
        base_planes: 64,
        builder: stem_128,
    },
    StaticStemEntry {
        rows: 256,
        cols: 256,
        channels: 1,
        base_planes: 64,
        builder: stem_256,
    },
];

/// Look up the stem entry for an input shape.
pub fn lookup_stem(shape: &ImageShape) -> Option<&'static StaticStemEntry> {
    STEM_TABLE.iter().find(|entry| entry.matches(shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    fn shape(
        rows: usize,
        cols: usize,
        channels: usize,
    ) -> ImageShape {
        ImageShape {
            rows,
            cols,
            channels,
        }
    }

    #[test]
    fn test_stem_table_lookup() {
        assert!(lookup_stem(&shape(128, 128, 1)).is_some());
        assert!(lookup_stem(&shape(256, 256, 1)).is_some());

        assert!(lookup_stem(&shape(64, 64, 1)).is_none());
        assert!(lookup_stem(&shape(128, 128, 3)).is_none());
        assert!(lookup_stem(&shape(128, 256, 1)).is_none());
    }

    #[test]
    fn test_stem_128_sequence() {
        let entry = lookup_stem(&shape(128, 128, 1)).unwrap();
        assert_eq!(entry.base_planes, 64);

        let config = entry.to_config();
        assert_eq!(config.convs.len(), 3);
        assert_eq!(config.convs[0].conv.channels, [1, 64]);
        assert_eq!(config.convs[0].conv.stride, [2, 2]);
        assert_eq!(config.convs[1].conv.channels, [64, 64]);
        assert_eq!(config.convs[1].conv.stride, [1, 1]);
        assert_eq!(config.convs[2].conv.channels, [64, 128]);
        assert_eq!(config.convs[2].conv.stride, [1, 1]);

        assert_eq!(config.in_channels(), 1);
        assert_eq!(config.out_channels(), 128);
        assert_eq!(config.drop_prob, 0.2);
        assert_eq!(config.stride(), 4);
        assert_eq!(config.output_resolution([128, 128]), [32, 32]);
    }

    #[test]
    fn test_stem_256_sequence() {
        let entry = lookup_stem(&shape(256, 256, 1)).unwrap();
        assert_eq!(entry.base_planes, 64);

        let config = entry.to_config();
        assert_eq!(config.convs.len(), 2);
        assert_eq!(config.convs[0].conv.channels, [1, 64]);
        assert_eq!(config.convs[0].conv.stride, [2, 2]);
        assert_eq!(config.convs[1].conv.channels, [64, 64]);
        assert_eq!(config.convs[1].conv.stride, [2, 2]);

        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.stride(), 8);
        assert_eq!(config.output_resolution([256, 256]), [32, 32]);
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: Stem<B> = stem_128().init(&device);
        assert_eq!(stem.in_channels(), 1);
        assert_eq!(stem.out_channels(), 128);
        assert_eq!(stem.stride(), 4);

        let input = Tensor::ones([1, 1, 128, 128], &device);
        let output = stem.forward(input);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 1),
                ("out_channels", 128),
                ("out_height", 32),
                ("out_width", 32)
            ],
        );
    }
}
