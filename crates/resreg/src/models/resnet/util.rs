//! # `ResNet` Utilities
use bimm_contracts::unpack_shape_contract;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Initializer, PaddingConfig2d};
use std::sync::LazyLock;

/// He-normal initializer, for convolutions feeding into ReLU stacks.
pub static CONV_INTO_RELU_INITIALIZER: LazyLock<Initializer> =
    LazyLock::new(|| Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    });

/// Lift a scalar to a square `[usize; 2]` layer parameter.
#[inline(always)]
pub fn scalar_to_array(scalar: usize) -> [usize; 2] {
    [scalar, scalar]
}

/// Get the output resolution for a given input resolution.
///
/// The input must be a multiple of the stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "height_in" = "height_out" * "stride",
            "width_in" = "width_out" * "stride"
        ],
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)]
    )
}

/// Per-axis stride ratio between an input and a residual resolution.
///
/// Each ratio is rounded to the nearest integer, so resolutions produced
/// by padded strided convolutions (which may not divide exactly) still
/// report the stride that produced them.
#[inline(always)]
pub fn rounded_stride_ratio(
    input_resolution: [usize; 2],
    residual_resolution: [usize; 2],
) -> [usize; 2] {
    [
        round_div(input_resolution[0], residual_resolution[0]),
        round_div(input_resolution[1], residual_resolution[1]),
    ]
}

fn round_div(
    numerator: usize,
    denominator: usize,
) -> usize {
    (2 * numerator + denominator) / (2 * denominator)
}

/// A 3×3 [`Conv2dConfig`] with unit padding and He-normal init.
///
/// Halves even resolutions exactly at stride 2.
pub fn conv3x3(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
) -> Conv2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [3, 3])
        .with_stride(scalar_to_array(stride))
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(CONV_INTO_RELU_INITIALIZER.clone())
}

/// A 1×1 [`Conv2dConfig`] with valid padding and He-normal init.
pub fn conv1x1(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
) -> Conv2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [1, 1])
        .with_stride(scalar_to_array(stride))
        .with_padding(PaddingConfig2d::Valid)
        .with_initializer(CONV_INTO_RELU_INITIALIZER.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_div_output_resolution() {
        assert_eq!(stride_div_output_resolution([32, 32], 1), [32, 32]);
        assert_eq!(stride_div_output_resolution([32, 16], 2), [16, 8]);
    }

    #[test]
    #[should_panic]
    fn test_stride_div_output_resolution_panic() {
        stride_div_output_resolution([7, 7], 2);
    }

    #[test]
    fn test_rounded_stride_ratio() {
        assert_eq!(rounded_stride_ratio([32, 32], [32, 32]), [1, 1]);
        assert_eq!(rounded_stride_ratio([32, 32], [16, 16]), [2, 2]);
        assert_eq!(rounded_stride_ratio([32, 16], [16, 16]), [2, 1]);
        // padded stride-2 conv on an odd extent: 7 -> 4, ratio still 2
        assert_eq!(rounded_stride_ratio([7, 7], [4, 4]), [2, 2]);
    }

    #[test]
    fn test_conv_helpers() {
        let config = conv3x3(16, 32, 2);
        assert_eq!(config.channels, [16, 32]);
        assert_eq!(config.kernel_size, [3, 3]);
        assert_eq!(config.stride, [2, 2]);

        let config = conv1x1(16, 32, 1);
        assert_eq!(config.channels, [16, 32]);
        assert_eq!(config.kernel_size, [1, 1]);
        assert_eq!(config.stride, [1, 1]);
    }
}
