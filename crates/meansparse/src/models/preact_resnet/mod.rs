//! # Pre-Activation `ResNet`
//!
//! `PreActResNet-18` and `PreActResNet-34` for ``32x32`` images,
//! with optional [`crate::layers::mean_sparse::MeanSparse`] layers
//! after each normalization.

pub mod block;
pub mod model;
