#![allow(missing_docs)]
//! # `WideResNet` PyTorch Checkpoint Import.
//!
//! The stub modules below mirror the key layout of PyTorch `WideResNet`
//! checkpoints with `MeanSparse` buffers:
//!
//! ```text
//! init_conv.weight
//! layer.<g>.block.<i>.{batchnorm_0, conv_0, batchnorm_1, conv_1, shortcut}.*
//! layer.<g>.block.<i>.meansparse_{0,1,2}.{running_mean, running_var}
//! batchnorm.*
//! meansparse_end.{running_mean, running_var}
//! logits.{weight, bias}
//! ```
//!
//! Stateless modules (activations, pooling) carry no keys, and the scalar
//! `MeanSparse` buffers (``threshold``, ``flag_update_statistics``,
//! ``batch_num``) are not read; the threshold is chosen by the caller.

use crate::layers::mean_sparse::MeanSparse;
use crate::models::sparsity::MeanSparseHost;
use crate::models::wide_resnet::block::WideResNetBlock;
use crate::models::wide_resnet::block_group::WideResNetBlockGroup;
use crate::models::wide_resnet::model::WideResNet;
use anyhow::{Context, ensure};
use burn::module::{Module, Param};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear};
use burn::prelude::{Backend, Tensor};
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::{Path, PathBuf};

/// Load weights from a ``torch`` checkpoint onto a [`WideResNet`] model.
///
/// # Arguments
///
/// - `model`: the target model; its structure must match the checkpoint.
/// - `path`: the checkpoint path.
/// - `threshold`: when set, the threshold of every `MeanSparse` layer.
pub fn load_pytorch_weights<B: Backend>(
    model: WideResNet<B>,
    path: &Path,
    threshold: Option<f64>,
) -> anyhow::Result<WideResNet<B>> {
    let device = model
        .devices()
        .first()
        .cloned()
        .context("model has no device")?;
    let record = load_wide_resnet_stub_record::<B>(path, &device)?;

    ensure!(
        record.layer.len() == model.groups.len(),
        "checkpoint has {} block groups; model has {}",
        record.layer.len(),
        model.groups.len()
    );
    for (idx, (stub, group)) in record.layer.iter().zip(&model.groups).enumerate() {
        ensure!(
            stub.block.len() == group.blocks.len(),
            "checkpoint layer.{idx} has {} blocks; model has {}",
            stub.block.len(),
            group.blocks.len()
        );
    }

    let model = record.copy_weights(model);
    tracing::info!(
        path = %path.display(),
        sparse_layers = model.num_sparse_layers(),
        "loaded pytorch checkpoint"
    );

    Ok(match threshold {
        Some(threshold) => model.with_threshold(threshold),
        None => model,
    })
}

fn load_args(
    path: PathBuf,
    top_level_key: Option<&str>,
) -> LoadArgs {
    let args = LoadArgs::new(path).with_key_remap(r"^module\.", "");
    match top_level_key {
        Some(key) => args.with_top_level_key(key),
        None => args,
    }
}

/// Load a [`WideResNetStubRecord`] from a ``torch`` checkpoint.
///
/// Accepts a bare state dict, or one nested under ``state_dict``;
/// a ``module.`` key prefix is removed.
pub fn load_wide_resnet_stub_record<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<WideResNetStubRecord<B>> {
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::new();

    match recorder.load(load_args(path.to_path_buf(), Some("state_dict")), device) {
        Ok(record) => Ok(record),
        Err(nested_err) => {
            tracing::debug!(%nested_err, "no nested state_dict; reading a bare state dict");
            recorder
                .load(load_args(path.to_path_buf(), None), device)
                .with_context(|| format!("loading pytorch checkpoint {}", path.display()))
        }
    }
}

#[derive(Module, Debug)]
pub struct WideResNetStub<B: Backend> {
    pub init_conv: Conv2d<B>,
    pub layer: Vec<BlockGroupStub<B>>,
    pub batchnorm: BatchNorm<B, 2>,
    pub meansparse_end: Option<MeanSparseStub<B>>,
    pub logits: Linear<B>,
}

impl<B: Backend> WideResNetStubRecord<B> {
    pub fn copy_weights(
        self,
        target: WideResNet<B>,
    ) -> WideResNet<B> {
        WideResNet {
            init_conv: target.init_conv.load_record(self.init_conv),
            groups: self
                .layer
                .into_iter()
                .zip(target.groups)
                .map(|(s, t)| s.copy_weights(t))
                .collect(),
            norm: target.norm.load_record(self.batchnorm),
            sparse_end: copy_mean_sparse_statistics(self.meansparse_end, target.sparse_end),
            logits: target.logits.load_record(self.logits),
            ..target
        }
    }
}

#[derive(Module, Debug)]
pub struct BlockGroupStub<B: Backend> {
    pub block: Vec<BlockStub<B>>,
}

impl<B: Backend> BlockGroupStubRecord<B> {
    pub fn copy_weights(
        self,
        target: WideResNetBlockGroup<B>,
    ) -> WideResNetBlockGroup<B> {
        WideResNetBlockGroup {
            blocks: self
                .block
                .into_iter()
                .zip(target.blocks)
                .map(|(s, t)| s.copy_weights(t))
                .collect(),
        }
    }
}

#[derive(Module, Debug)]
pub struct BlockStub<B: Backend> {
    pub batchnorm_0: BatchNorm<B, 2>,
    pub meansparse_0: Option<MeanSparseStub<B>>,
    pub conv_0: Conv2d<B>,
    pub batchnorm_1: BatchNorm<B, 2>,
    pub meansparse_1: Option<MeanSparseStub<B>>,
    pub conv_1: Conv2d<B>,
    pub shortcut: Option<Conv2d<B>>,
    pub meansparse_2: Option<MeanSparseStub<B>>,
}

impl<B: Backend> BlockStubRecord<B> {
    pub fn copy_weights(
        self,
        target: WideResNetBlock<B>,
    ) -> WideResNetBlock<B> {
        let shortcut = match (self.shortcut, target.shortcut) {
            (Some(stub), Some(conv)) => Some(conv.load_record(stub)),
            (None, None) => None,
            (None, Some(_)) => panic!("None stub cannot be applied to Some<Conv2d> shortcut"),
            (Some(_), None) => panic!("Some<Conv2d> stub cannot be applied to None shortcut"),
        };

        WideResNetBlock {
            norm0: target.norm0.load_record(self.batchnorm_0),
            sparse0: copy_mean_sparse_statistics(self.meansparse_0, target.sparse0),
            conv0: target.conv0.load_record(self.conv_0),
            norm1: target.norm1.load_record(self.batchnorm_1),
            sparse1: copy_mean_sparse_statistics(self.meansparse_1, target.sparse1),
            conv1: target.conv1.load_record(self.conv_1),
            shortcut,
            sparse_out: copy_mean_sparse_statistics(self.meansparse_2, target.sparse_out),
            ..target
        }
    }
}

#[derive(Module, Debug)]
pub struct MeanSparseStub<B: Backend> {
    pub running_mean: Param<Tensor<B, 1>>,
    pub running_var: Param<Tensor<B, 1>>,
}

/// Copy checkpoint statistics onto an optional [`MeanSparse`] layer.
///
/// Checkpoints without statistics leave the layer as it is; statistics
/// for a disabled layer are dropped.
pub fn copy_mean_sparse_statistics<B: Backend>(
    stub: Option<MeanSparseStubRecord<B>>,
    target: Option<MeanSparse<B>>,
) -> Option<MeanSparse<B>> {
    match (stub, target) {
        (Some(stub), Some(layer)) => {
            Some(layer.with_statistics(stub.running_mean.val(), stub.running_var.val()))
        }
        (Some(_), None) => {
            tracing::warn!("checkpoint MeanSparse statistics dropped; sparsity is disabled");
            None
        }
        (None, target) => target,
    }
}
