//! Fused convolution blocks.
pub mod conv_norm_act;
pub mod norm_act;
pub mod preact_conv;
