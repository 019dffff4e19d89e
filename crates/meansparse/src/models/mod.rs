//! # Model Families

pub mod classifier;
pub mod preact_resnet;
pub mod sparsity;
pub mod util;
pub mod wide_resnet;
