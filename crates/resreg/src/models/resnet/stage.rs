//! # `ResNet` Stage
//!
//! A [`Stage`] is a sequence of [`ResidualBlock`]s at a fixed filter
//! count. Only the first block of a stage downsamples (stride 2), and
//! only when the stage is not the network's first; there the stem pool
//! has already halved the resolution.
//!
//! [`StageMeta`] defines a common meta API for [`Stage`] and
//! [`StageConfig`].

use crate::models::resnet::error::{BuildResult, ResNetBuildError};
use crate::models::resnet::residual_block::{
    BlockKind, ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::resnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the stage.
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

/// [`Stage`] Configuration.
///
/// Implements [`StageMeta`]; must hold at least one block.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for StageConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl StageMeta for StageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl StageConfig {
    /// Build a stage of repeated blocks of one kind.
    ///
    /// The first block halves the resolution (stride 2) unless the stage
    /// is the network's first; all later blocks use stride 1. The first
    /// block of the first stage skips its pre-activation.
    ///
    /// # Arguments
    ///
    /// - `kind`: the block variant.
    /// - `in_planes`: planes entering the stage.
    /// - `planes`: the stage filter count.
    /// - `repetitions`: number of blocks.
    /// - `first_stage`: whether this is the network's first stage.
    pub fn build(
        kind: BlockKind,
        in_planes: usize,
        planes: usize,
        repetitions: usize,
        first_stage: bool,
    ) -> Self {
        let expansion = kind.expansion();
        let blocks = (0..repetitions)
            .map(|idx| {
                let stride = if idx == 0 && !first_stage { 2 } else { 1 };
                let block_in = if idx == 0 { in_planes } else { planes * expansion };
                kind.to_block_config(block_in, planes, stride, first_stage && idx == 0)
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Errors
    ///
    /// [`ResNetBuildError::IncompatibleBlocks`] when adjacent blocks
    /// disagree on feature planes.
    pub fn try_validate(&self) -> BuildResult<()> {
        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(ResNetBuildError::IncompatibleBlocks {
                    index: idx,
                    out_planes: prev.out_planes(),
                    in_planes: curr.in_planes(),
                });
            }
        }
        Ok(())
    }

    /// Panic unless the config is non-empty and valid.
    pub fn expect_valid(&self) {
        if self.is_empty() {
            panic!("stage has no blocks");
        }
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, ResidualBlockConfig) -> ResidualBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }

    /// Update the dropout probability of every block.
    pub fn with_drop_prob(
        self,
        drop_prob: f64,
    ) -> Self {
        self.map_blocks(&mut |_, block| block.with_drop_prob(drop_prob))
    }

    /// Initialize a new [`Stage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();

        Stage {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// A sequence of residual blocks at a fixed filter count.
///
/// Implements [`StageMeta`].
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::basic_block::BasicBlockConfig;
    use crate::models::resnet::residual_block::ResidualBlockMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_stage_build_first_stage() {
        let config = StageConfig::build(BlockKind::Basic, 128, 64, 2, true);
        config.expect_valid();
        assert_eq!(config.len(), 2);
        assert_eq!(config.in_planes(), 128);
        assert_eq!(config.out_planes(), 64);
        // the stem pool already downsampled: no stride here
        assert_eq!(config.stride(), 1);

        let block1 = &config.blocks[0];
        assert_eq!(block1.stride(), 1);
        match block1 {
            ResidualBlockConfig::Basic(config) => assert!(config.skip_first_preact),
            _ => unreachable!(),
        }

        let block2 = &config.blocks[1];
        assert_eq!(block2.in_planes(), 64);
        assert_eq!(block2.stride(), 1);
        match block2 {
            ResidualBlockConfig::Basic(config) => assert!(!config.skip_first_preact),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_stage_build_later_stage() {
        let config = StageConfig::build(BlockKind::Bottleneck, 256, 128, 3, false);
        config.expect_valid();
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 256);
        assert_eq!(config.out_planes(), 512);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);

        // only the first block downsamples
        assert_eq!(config.blocks[0].stride(), 2);
        assert_eq!(config.blocks[1].stride(), 1);
        assert_eq!(config.blocks[2].stride(), 1);

        // later blocks consume the expanded planes
        assert_eq!(config.blocks[1].in_planes(), 512);
    }

    #[test]
    fn test_stage_try_validate() {
        let config = StageConfig::from(vec![
            BasicBlockConfig::new(16, 32).into(),
            BasicBlockConfig::new(64, 64).into(),
        ]);
        let err = config.try_validate().unwrap_err();
        assert_eq!(
            err,
            ResNetBuildError::IncompatibleBlocks {
                index: 1,
                out_planes: 32,
                in_planes: 64,
            }
        );
    }

    #[test]
    #[should_panic(expected = "stage has no blocks")]
    fn test_stage_init_empty_panics() {
        type B = NdArray<f32>;
        let device: <B as Backend>::Device = Default::default();
        let _block: Stage<B> = StageConfig::from(vec![]).init(&device);
    }

    #[test]
    fn test_stage_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = StageConfig::build(BlockKind::Basic, 8, 16, 2, false);
        let stage: Stage<B> = config.init(&device);

        assert_eq!(stage.len(), 2);
        assert_eq!(stage.in_planes(), 8);
        assert_eq!(stage.out_planes(), 16);
        assert_eq!(stage.stride(), 2);
        assert_eq!(stage.output_resolution([12, 24]), [6, 12]);

        let input = Tensor::ones([2, 8, 12, 24], &device);
        let output = stage.forward(input.clone());

        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 16),
                ("out_height", 6),
                ("out_width", 12)
            ],
        );

        let mut expected = input;
        for block in stage.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
