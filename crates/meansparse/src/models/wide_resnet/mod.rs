//! # `WideResNet` with `MeanSparse`
//!
//! A pre-activation `WideResNet` for ``32x32`` images, with a
//! [`crate::layers::mean_sparse::MeanSparse`] layer after every
//! normalization and after every residual sum.

pub mod block;
pub mod block_group;
pub mod model;
