//! # Residual Block Wrapper
//!
//! [`ResidualBlock`] wraps the two block variants behind one `Module`;
//! [`BlockKind`] is the closed enumeration used to select a variant, by
//! value or by name through a fixed mapping table.

use crate::models::resnet::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use crate::models::resnet::bottleneck::{
    BOTTLENECK_EXPANSION, BottleneckBlock, BottleneckBlockConfig, BottleneckBlockMeta,
};
use crate::models::resnet::error::{BuildResult, ResNetBuildError};
use crate::models::resnet::util::stride_div_output_resolution;
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};

/// Closed enumeration of residual block variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Two 3×3 convolutions ([`BasicBlock`]).
    Basic,

    /// 1×1 reduce → 3×3 → 1×1 expand ([`BottleneckBlock`]).
    Bottleneck,
}

/// Name table for [`BlockKind`] resolution.
pub const BLOCK_KIND_NAMES: &[(&str, BlockKind)] = &[
    ("basic_block", BlockKind::Basic),
    ("bottleneck", BlockKind::Bottleneck),
];

impl BlockKind {
    /// The canonical name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Basic => "basic_block",
            BlockKind::Bottleneck => "bottleneck",
        }
    }

    /// Resolve a variant by name.
    ///
    /// # Errors
    ///
    /// [`ResNetBuildError::UnknownBlockKind`] if the name is absent from
    /// [`BLOCK_KIND_NAMES`].
    pub fn from_name(name: &str) -> BuildResult<Self> {
        BLOCK_KIND_NAMES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ResNetBuildError::UnknownBlockKind(name.to_string()))
    }

    /// The channel expansion of the variant.
    pub fn expansion(&self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => BOTTLENECK_EXPANSION,
        }
    }

    /// Build a block config of this kind.
    pub fn to_block_config(
        &self,
        in_planes: usize,
        planes: usize,
        stride: usize,
        skip_first_preact: bool,
    ) -> ResidualBlockConfig {
        match self {
            BlockKind::Basic => BasicBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_skip_first_preact(skip_first_preact)
                .into(),
            BlockKind::Bottleneck => BottleneckBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_skip_first_preact(skip_first_preact)
                .into(),
        }
    }
}

impl std::str::FromStr for BlockKind {
    type Err = ResNetBuildError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::from_name(name)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The variant's filter count.
    fn planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of the block.
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

/// [`ResidualBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlockConfig),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),
}

impl From<BasicBlockConfig> for ResidualBlockConfig {
    fn from(config: BasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.planes(),
            Self::Bottleneck(config) => config.planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }
}

impl ResidualBlockConfig {
    /// The kind of the wrapped config.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
        }
    }

    /// Update the dropout probability.
    pub fn with_drop_prob(
        self,
        drop_prob: f64,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_drop_prob(drop_prob).into(),
            Self::Bottleneck(config) => config.with_drop_prob(drop_prob).into(),
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => ResidualBlock::Basic(config.init(device)),
            Self::Bottleneck(config) => ResidualBlock::Bottleneck(config.init(device)),
        }
    }
}

/// A `ResNet` [`BasicBlock`] or [`BottleneckBlock`] wrapper.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlock<B>),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),
}

impl<B: Backend> From<BasicBlock<B>> for ResidualBlock<B> {
    fn from(block: BasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<BottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: BottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.planes(),
            Self::Bottleneck(block) => block.planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Apply the wrapped block to the input.
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
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }
}
