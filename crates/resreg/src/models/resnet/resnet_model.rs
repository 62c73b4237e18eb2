//! # `ResNet` Core Model
//!
//! [`ResNetConfig`] is the high-level builder input: a rank-3 input shape
//! descriptor, an output unit count, a block kind, and a per-stage
//! repetition list.
//!
//! [`ResNetConfig::try_to_structure`] validates it into a
//! [`ResNetStructureConfig`] (stem, stages, and head), and
//! [`ResNetStructureConfig::init`] initializes a [`ResNet`].
//!
//! The head is a regression head: norm/act cap, average pool over the full
//! remaining spatial extent, dropout, flatten, and a linear layer with no
//! activation.

use crate::layers::blocks::norm_act::{NormAct2d, NormAct2dConfig};
use crate::models::resnet::dim_order::DimOrder;
use crate::models::resnet::error::{BuildResult, ResNetBuildError};
use crate::models::resnet::residual_block::BlockKind;
use crate::models::resnet::stage::{Stage, StageConfig, StageMeta};
use crate::models::resnet::stem::{Stem, StemConfig, StemMeta, lookup_stem};
use crate::models::resnet::util::CONV_INTO_RELU_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// `ResNet`-18 block depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// `ResNet`-34 block depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet`-50 block depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet`-101 block depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
/// `ResNet`-152 block depths.
pub const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// High-level `ResNet` model configuration.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Input shape descriptor; must have rank 3, read per `dim_order`.
    pub input_shape: Vec<usize>,

    /// Output units of the regression head.
    pub num_outputs: usize,

    /// Residual block variant.
    pub block_kind: BlockKind,

    /// Per-stage block repetition counts.
    pub repetitions: Vec<usize>,

    /// Axis ordering of the shape descriptor.
    #[config(default = "DimOrder::ChannelsLast")]
    pub dim_order: DimOrder,

    /// Dropout probability used throughout the network.
    #[config(default = "0.2")]
    pub drop_prob: f64,
}

impl ResNetConfig {
    /// `ResNet`-18: basic blocks, depths ``[2, 2, 2, 2]``.
    pub fn resnet_18(
        input_shape: Vec<usize>,
        num_outputs: usize,
    ) -> Self {
        Self::new(
            input_shape,
            num_outputs,
            BlockKind::Basic,
            RESNET18_BLOCKS.to_vec(),
        )
    }

    /// `ResNet`-34: basic blocks, depths ``[3, 4, 6, 3]``.
    pub fn resnet_34(
        input_shape: Vec<usize>,
        num_outputs: usize,
    ) -> Self {
        Self::new(
            input_shape,
            num_outputs,
            BlockKind::Basic,
            RESNET34_BLOCKS.to_vec(),
        )
    }

    /// `ResNet`-50: bottleneck blocks, depths ``[3, 4, 6, 3]``.
    pub fn resnet_50(
        input_shape: Vec<usize>,
        num_outputs: usize,
    ) -> Self {
        Self::new(
            input_shape,
            num_outputs,
            BlockKind::Bottleneck,
            RESNET50_BLOCKS.to_vec(),
        )
    }

    /// `ResNet`-101: bottleneck blocks, depths ``[3, 4, 23, 3]``.
    pub fn resnet_101(
        input_shape: Vec<usize>,
        num_outputs: usize,
    ) -> Self {
        Self::new(
            input_shape,
            num_outputs,
            BlockKind::Bottleneck,
            RESNET101_BLOCKS.to_vec(),
        )
    }

    /// `ResNet`-152: bottleneck blocks, depths ``[3, 8, 36, 3]``.
    pub fn resnet_152(
        input_shape: Vec<usize>,
        num_outputs: usize,
    ) -> Self {
        Self::new(
            input_shape,
            num_outputs,
            BlockKind::Bottleneck,
            RESNET152_BLOCKS.to_vec(),
        )
    }

    /// Select the block variant by name.
    ///
    /// # Errors
    ///
    /// [`ResNetBuildError::UnknownBlockKind`] if the name is unrecognized.
    pub fn with_block_kind_name(
        self,
        name: &str,
    ) -> BuildResult<Self> {
        Ok(Self {
            block_kind: BlockKind::from_name(name)?,
            ..self
        })
    }

    /// Convert to a validated [`ResNetStructureConfig`].
    ///
    /// Resolves the shape-axis convention exactly once; every
    /// shape-dependent computation below reads that resolution.
    ///
    /// # Errors
    ///
    /// - [`ResNetBuildError::InvalidInputRank`] unless the shape
    ///   descriptor has rank 3.
    /// - [`ResNetBuildError::UnsupportedStem`] when no stem table entry
    ///   covers the input shape.
    /// - [`ResNetBuildError::EmptyStage`] for a zero repetition count.
    /// - [`ResNetBuildError::SpatialUnderflow`] when a stage stride does
    ///   not divide the running spatial extent.
    pub fn try_to_structure(&self) -> BuildResult<ResNetStructureConfig> {
        let axes = self.dim_order.axes();
        let shape = axes.unpack(&self.input_shape)?;

        let entry = lookup_stem(&shape).ok_or(ResNetBuildError::UnsupportedStem {
            rows: shape.rows,
            cols: shape.cols,
            channels: shape.channels,
        })?;
        let stem = entry.to_config().with_drop_prob(self.drop_prob);

        let mut resolution = stem.output_resolution(shape.resolution());
        let mut in_planes = stem.out_channels();
        let mut planes = entry.base_planes;

        let mut stages = Vec::with_capacity(self.repetitions.len());
        for (index, &repetitions) in self.repetitions.iter().enumerate() {
            if repetitions == 0 {
                return Err(ResNetBuildError::EmptyStage { index });
            }
            let stage = StageConfig::build(
                self.block_kind,
                in_planes,
                planes,
                repetitions,
                index == 0,
            )
            .with_drop_prob(self.drop_prob);
            stage.try_validate()?;

            let stride = stage.stride();
            if resolution[0] % stride != 0 || resolution[1] % stride != 0 {
                return Err(ResNetBuildError::SpatialUnderflow {
                    index,
                    stride,
                    rows: resolution[0],
                    cols: resolution[1],
                });
            }
            resolution = stage.output_resolution(resolution);
            in_planes = stage.out_planes();
            planes *= 2;
            stages.push(stage);
        }

        Ok(
            ResNetStructureConfig::new(stem, stages, in_planes, resolution, self.num_outputs)
                .with_drop_prob(self.drop_prob),
        )
    }

    /// Build the model: validate, then initialize layers.
    ///
    /// # Errors
    ///
    /// See [`ResNetConfig::try_to_structure`].
    pub fn build<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BuildResult<ResNet<B>> {
        Ok(self.try_to_structure()?.init(device))
    }
}

/// [`ResNet`] Structure Config.
///
/// This config defines the structure of a validated `ResNet` model;
/// [`ResNetConfig::try_to_structure`] is the checked way to obtain one,
/// and [`ResNetStructureConfig::init`] is infallible.
#[derive(Config, Debug)]
pub struct ResNetStructureConfig {
    /// The input stem.
    pub stem: StemConfig,

    /// The residual stages.
    pub stages: Vec<StageConfig>,

    /// Feature planes entering the head.
    pub num_features: usize,

    /// Spatial extent entering the head; the head pools over all of it.
    pub head_resolution: [usize; 2],

    /// Output units of the regression head.
    pub num_outputs: usize,

    /// Head dropout probability.
    #[config(default = "0.2")]
    pub drop_prob: f64,
}

impl ResNetStructureConfig {
    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResNet<B> {
        ResNet {
            stem: self.stem.init(device),
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.init(device))
                .collect(),
            norm_act: NormAct2dConfig::new(self.num_features).init(device),
            avgpool: AvgPool2dConfig::new(self.head_resolution)
                .with_strides([1, 1])
                .init(),
            drop: DropoutConfig::new(self.drop_prob).init(),
            fc: LinearConfig::new(self.num_features, self.num_outputs)
                .with_initializer(CONV_INTO_RELU_INITIALIZER.clone())
                .init(device),
        }
    }
}

/// `ResNet` regression model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input stem.
    pub stem: Stem<B>,

    /// Residual stages.
    pub stages: Vec<Stage<B>>,

    /// Trunk cap.
    pub norm_act: NormAct2d<B>,

    /// Full-extent average pool.
    pub avgpool: AvgPool2d,

    /// Head dropout.
    pub drop: Dropout,

    /// Linear regression output; no activation.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// Output units of the regression head.
    pub fn num_outputs(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// `ResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, rows, cols]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, num_outputs]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_channels", self.stem.in_channels())],
        );

        // Stem
        let x = self.stem.forward(input);

        // Residual stages
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));

        // Head
        let x = self.norm_act.forward(x);
        let x = self.avgpool.forward(x);
        let x = self.drop.forward(x);
        // [batch, features, 1, 1] -> [batch, features]
        let x = x.flatten(1, 3);
        let out = self.fc.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_outputs"],
            &out,
            &[("batch", batch), ("num_outputs", self.num_outputs())],
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::bottleneck::BOTTLENECK_EXPANSION;
    use crate::models::resnet::residual_block::ResidualBlockMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    const SHAPE_128: [usize; 3] = [128, 128, 1];
    const SHAPE_256: [usize; 3] = [256, 256, 1];

    #[test]
    fn test_presets_structure_num_outputs() {
        let presets = [
            ResNetConfig::resnet_18(SHAPE_128.to_vec(), 3),
            ResNetConfig::resnet_34(SHAPE_128.to_vec(), 3),
            ResNetConfig::resnet_50(SHAPE_128.to_vec(), 3),
            ResNetConfig::resnet_101(SHAPE_128.to_vec(), 3),
            ResNetConfig::resnet_152(SHAPE_128.to_vec(), 3),
        ];
        let all_depths: [&[usize]; 5] = [
            &RESNET18_BLOCKS,
            &RESNET34_BLOCKS,
            &RESNET50_BLOCKS,
            &RESNET101_BLOCKS,
            &RESNET152_BLOCKS,
        ];

        for (config, depths) in presets.iter().zip(all_depths) {
            let structure = config.try_to_structure().unwrap();
            assert_eq!(structure.num_outputs, 3);
            assert_eq!(structure.stages.len(), 4);
            for (stage, &depth) in structure.stages.iter().zip(depths) {
                assert_eq!(stage.len(), depth);
            }
            assert_eq!(
                structure.num_features,
                512 * config.block_kind.expansion()
            );
            // 32x32 after the stem, halved by each later stage
            assert_eq!(structure.head_resolution, [4, 4]);
        }
    }

    #[test]
    fn test_presets_structure_256() {
        for config in [
            ResNetConfig::resnet_18(SHAPE_256.to_vec(), 1),
            ResNetConfig::resnet_50(SHAPE_256.to_vec(), 1),
        ] {
            let structure = config.try_to_structure().unwrap();
            assert_eq!(structure.stem.convs.len(), 2);
            assert_eq!(structure.head_resolution, [4, 4]);
            assert_eq!(structure.num_outputs, 1);
        }
    }

    #[test]
    fn test_stage_planes_double_per_stage() {
        let config = ResNetConfig::resnet_50(SHAPE_128.to_vec(), 2);
        let structure = config.try_to_structure().unwrap();

        for (index, stage) in structure.stages.iter().enumerate() {
            let planes = 64 << index;
            assert_eq!(stage.blocks[0].planes(), planes);
            assert_eq!(stage.out_planes(), planes * BOTTLENECK_EXPANSION);
        }
    }

    #[test]
    fn test_first_stage_projects_stem_channels() {
        // the 128 stem emits 128 channels, stage 1 runs 64 filters:
        // the first block projects through its shortcut despite stride 1
        let config = ResNetConfig::resnet_18(SHAPE_128.to_vec(), 2);
        let structure = config.try_to_structure().unwrap();

        let first = &structure.stages[0].blocks[0];
        assert_eq!(first.in_planes(), 128);
        assert_eq!(first.out_planes(), 64);
        assert_eq!(first.stride(), 1);
    }

    #[test]
    fn test_invalid_input_rank() {
        let err = ResNetConfig::resnet_18(vec![128, 128], 2)
            .try_to_structure()
            .unwrap_err();
        assert!(matches!(
            err,
            ResNetBuildError::InvalidInputRank { rank: 2, .. }
        ));

        let err = ResNetConfig::resnet_18(vec![1, 128, 128, 1], 2)
            .try_to_structure()
            .unwrap_err();
        assert!(matches!(
            err,
            ResNetBuildError::InvalidInputRank { rank: 4, .. }
        ));
    }

    #[test]
    fn test_unsupported_stem_shape() {
        let err = ResNetConfig::resnet_18(vec![64, 64, 1], 2)
            .try_to_structure()
            .unwrap_err();
        assert_eq!(
            err,
            ResNetBuildError::UnsupportedStem {
                rows: 64,
                cols: 64,
                channels: 1,
            }
        );
    }

    #[test]
    fn test_unknown_block_kind_name() {
        let err = ResNetConfig::resnet_18(SHAPE_128.to_vec(), 2)
            .with_block_kind_name("wide_block")
            .unwrap_err();
        assert_eq!(
            err,
            ResNetBuildError::UnknownBlockKind("wide_block".to_string())
        );

        let config = ResNetConfig::resnet_18(SHAPE_128.to_vec(), 2)
            .with_block_kind_name("bottleneck")
            .unwrap();
        assert_eq!(config.block_kind, BlockKind::Bottleneck);
    }

    #[test]
    fn test_empty_stage_rejected() {
        let config = ResNetConfig::new(
            SHAPE_128.to_vec(),
            2,
            BlockKind::Basic,
            vec![2, 0, 2],
        );
        let err = config.try_to_structure().unwrap_err();
        assert_eq!(err, ResNetBuildError::EmptyStage { index: 1 });
    }

    #[test]
    fn test_spatial_underflow_rejected() {
        // the stem emits 32x32; the first stage keeps it, stages 1..=5
        // halve it down to 1x1, and stage 6 cannot halve further
        let config = ResNetConfig::new(
            SHAPE_128.to_vec(),
            2,
            BlockKind::Basic,
            vec![1; 8],
        );
        let err = config.try_to_structure().unwrap_err();
        assert_eq!(
            err,
            ResNetBuildError::SpatialUnderflow {
                index: 6,
                stride: 2,
                rows: 1,
                cols: 1,
            }
        );
    }

    #[test]
    fn test_channels_first_descriptor() {
        let config = ResNetConfig::resnet_18(vec![1, 128, 128], 2)
            .with_dim_order(DimOrder::ChannelsFirst);
        let structure = config.try_to_structure().unwrap();
        assert_eq!(structure.stem.convs.len(), 3);
    }

    #[test]
    fn test_resnet_18_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let num_outputs = 3;
        let model: ResNet<B> = ResNetConfig::resnet_18(SHAPE_128.to_vec(), num_outputs)
            .build(&device)
            .unwrap();
        assert_eq!(model.num_outputs(), num_outputs);
        assert_eq!(model.stages.len(), 4);

        let input = Tensor::ones([2, 1, 128, 128], &device);
        let output = model.forward(input);

        assert_shape_contract!(
            ["batch", "num_outputs"],
            &output,
            &[("batch", 2), ("num_outputs", num_outputs)],
        );
    }

    #[test]
    fn test_resnet_50_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::resnet_50(SHAPE_128.to_vec(), 1)
            .build(&device)
            .unwrap();

        let input = Tensor::ones([1, 1, 128, 128], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 1]);
    }
}
