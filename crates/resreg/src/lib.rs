#![warn(missing_docs)]
//!# resreg - Residual Regression Networks for Burn
//!
//! Parametric ResNet-style convolutional regressors (18/34/50/101/152),
//! assembled from burn layer configs over fixed grayscale input stems.
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - fused convolution blocks.
//!     * [`layers::blocks::conv_norm_act`] - ``Conv2d → BatchNorm → ReLU`` block.
//!     * [`layers::blocks::preact_conv`] - pre-activation ``BatchNorm → ReLU → Dropout → Conv2d`` block.
//!     * [`layers::blocks::norm_act`] - ``BatchNorm → ReLU`` cap.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - the `ResNet` regression family.

pub mod layers;
pub mod models;
