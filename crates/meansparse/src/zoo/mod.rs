//! # Model Zoo
//!
//! * [`prefabs`] - well-known named model configs.
//! * [`model_info`] - benchmark record files and leaderboards.

pub mod model_info;
pub mod prefabs;
