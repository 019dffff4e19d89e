//! # Checkpoint Import

pub mod pytorch;
