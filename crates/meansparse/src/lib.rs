#![warn(missing_docs)]
//!# meansparse - Sparsified Robust Image Classifiers
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::mean_sparse`] - the `MeanSparse` channel sparsification layer.
//!   * [`layers::activation`] - activation layer abstraction wrapper.
//!   * [`layers::normalize`] - input standardization.
//!   * [`layers::padding`] - fixed "SAME" padding for strided 3x3 convs.
//! * [`models`] - complete model families.
//!   * [`models::wide_resnet`] - `WideResNet` with `MeanSparse` layers.
//!   * [`models::preact_resnet`] - Pre-Activation `ResNet`.
//!   * [`models::classifier`] - architecture selection.
//!   * [`models::sparsity`] - model-wide `MeanSparse` control.
//! * [`calibrate`] - running statistics calibration pass.
//! * [`eval`] - clean accuracy evaluation.
//! * [`zoo`] - well-known configs and model info records.
//! * [`io`] - checkpoint import.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod calibrate;
pub mod eval;
pub mod io;
pub mod layers;
pub mod models;
pub mod zoo;
