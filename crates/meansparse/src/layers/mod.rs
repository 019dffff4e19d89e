//! # Reusable Layers

pub mod activation;
pub mod mean_sparse;
pub mod normalize;
pub mod padding;
