//! # `ResNet` build errors.

use thiserror::Error;

/// Result alias for model-building operations.
pub type BuildResult<T> = std::result::Result<T, ResNetBuildError>;

/// Errors raised while assembling a `ResNet` structure.
///
/// All variants are caught before any layer is initialized; a structure
/// config that exists is valid by construction. Shape violations at
/// `forward` time are contract panics, not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResNetBuildError {
    /// The input shape descriptor does not have rank 3.
    #[error("input shape must have rank 3, got rank {rank}: {shape:?}")]
    InvalidInputRank {
        /// Actual descriptor rank.
        rank: usize,
        /// The offending descriptor.
        shape: Vec<usize>,
    },

    /// A block kind name missing from the kind table.
    #[error("unknown residual block kind {0:?}; known kinds: basic_block, bottleneck")]
    UnknownBlockKind(String),

    /// No stem entry covers the input shape.
    #[error("no stem defined for input shape {rows}x{cols}x{channels}")]
    UnsupportedStem {
        /// Requested rows.
        rows: usize,
        /// Requested cols.
        cols: usize,
        /// Requested channels.
        channels: usize,
    },

    /// A stage with a zero repetition count.
    #[error("stage {index} has zero repetitions")]
    EmptyStage {
        /// Stage position in the repetition list.
        index: usize,
    },

    /// Adjacent blocks with mismatched feature planes.
    #[error("block {index} expects {in_planes} input planes, predecessor emits {out_planes}")]
    IncompatibleBlocks {
        /// Position of the downstream block.
        index: usize,
        /// Planes emitted by the upstream block.
        out_planes: usize,
        /// Planes expected by the downstream block.
        in_planes: usize,
    },

    /// A stage stride that does not divide the running spatial extent.
    #[error("stage {index} stride {stride} does not divide resolution {rows}x{cols}")]
    SpatialUnderflow {
        /// Stage position in the repetition list.
        index: usize,
        /// The stage's effective stride.
        stride: usize,
        /// Rows entering the stage.
        rows: usize,
        /// Cols entering the stage.
        cols: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResNetBuildError::InvalidInputRank {
            rank: 2,
            shape: vec![128, 128],
        };
        assert_eq!(
            err.to_string(),
            "input shape must have rank 3, got rank 2: [128, 128]"
        );

        let err = ResNetBuildError::UnknownBlockKind("wide_block".to_string());
        assert!(err.to_string().contains("wide_block"));

        let err = ResNetBuildError::UnsupportedStem {
            rows: 64,
            cols: 64,
            channels: 3,
        };
        assert_eq!(err.to_string(), "no stem defined for input shape 64x64x3");
    }
}
