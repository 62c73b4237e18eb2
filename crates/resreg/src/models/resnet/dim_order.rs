//! # Shape descriptor axis conventions.
//!
//! Tensors in this crate are always NCHW; [`DimOrder`] only governs how a
//! user-facing rank-3 shape descriptor is read. The convention is resolved
//! exactly once per build, into a [`ShapeAxes`] value that is threaded
//! through every shape-dependent computation.

use crate::models::resnet::error::{BuildResult, ResNetBuildError};
use serde::{Deserialize, Serialize};

/// Axis ordering of a rank-3 image shape descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimOrder {
    /// ``(rows, cols, channels)`` descriptors; the TensorFlow convention.
    #[default]
    ChannelsLast,

    /// ``(channels, rows, cols)`` descriptors; the torch/Theano convention.
    ChannelsFirst,
}

impl DimOrder {
    /// Resolve the axis positions for this ordering.
    pub fn axes(self) -> ShapeAxes {
        match self {
            DimOrder::ChannelsLast => ShapeAxes {
                row: 0,
                col: 1,
                channel: 2,
            },
            DimOrder::ChannelsFirst => ShapeAxes {
                row: 1,
                col: 2,
                channel: 0,
            },
        }
    }
}

/// Resolved axis positions within a rank-3 shape descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeAxes {
    /// Row axis index.
    pub row: usize,

    /// Column axis index.
    pub col: usize,

    /// Channel axis index.
    pub channel: usize,
}

impl ShapeAxes {
    /// Decode a shape descriptor.
    ///
    /// # Errors
    ///
    /// [`ResNetBuildError::InvalidInputRank`] unless the descriptor has
    /// rank 3.
    pub fn unpack(
        &self,
        shape: &[usize],
    ) -> BuildResult<ImageShape> {
        if shape.len() != 3 {
            return Err(ResNetBuildError::InvalidInputRank {
                rank: shape.len(),
                shape: shape.to_vec(),
            });
        }
        Ok(ImageShape {
            rows: shape[self.row],
            cols: shape[self.col],
            channels: shape[self.channel],
        })
    }
}

/// A decoded rank-3 image shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    /// Image rows.
    pub rows: usize,

    /// Image columns.
    pub cols: usize,

    /// Feature channels.
    pub channels: usize,
}

impl ImageShape {
    /// The NCHW tensor dims for a batch of images of this shape.
    pub fn to_batch_dims(
        &self,
        batch: usize,
    ) -> [usize; 4] {
        [batch, self.channels, self.rows, self.cols]
    }

    /// The spatial resolution, ``[rows, cols]``.
    pub fn resolution(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axes_positions() {
        let axes = DimOrder::ChannelsLast.axes();
        assert_eq!(axes.channel, 2);
        assert_eq!((axes.row, axes.col), (0, 1));

        let axes = DimOrder::ChannelsFirst.axes();
        assert_eq!(axes.channel, 0);
        assert_eq!((axes.row, axes.col), (1, 2));
    }

    #[test]
    fn test_unpack_both_orders() {
        let shape = DimOrder::ChannelsLast.axes().unpack(&[128, 96, 1]).unwrap();
        assert_eq!(
            shape,
            ImageShape {
                rows: 128,
                cols: 96,
                channels: 1
            }
        );

        let shape = DimOrder::ChannelsFirst.axes().unpack(&[1, 128, 96]).unwrap();
        assert_eq!(
            shape,
            ImageShape {
                rows: 128,
                cols: 96,
                channels: 1
            }
        );

        assert_eq!(shape.resolution(), [128, 96]);
        assert_eq!(shape.to_batch_dims(4), [4, 1, 128, 96]);
    }

    #[test]
    fn test_unpack_rejects_other_ranks() {
        let axes = DimOrder::default().axes();

        let err = axes.unpack(&[128, 128]).unwrap_err();
        assert_eq!(
            err,
            ResNetBuildError::InvalidInputRank {
                rank: 2,
                shape: vec![128, 128],
            }
        );

        let err = axes.unpack(&[1, 128, 128, 1]).unwrap_err();
        assert!(matches!(
            err,
            ResNetBuildError::InvalidInputRank { rank: 4, .. }
        ));
    }
}
