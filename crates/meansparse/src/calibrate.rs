//! # Calibration Pass
//!
//! [`calibrate_statistics`] re-estimates the running statistics of every
//! [`crate::layers::mean_sparse::MeanSparse`] layer of a model, as the
//! average of the per-batch means and variances over a batch iterator.
//!
//! Calibration does not change thresholds; a typical workflow calibrates
//! with the pass-through threshold ``0.0`` and then selects a threshold.
//!
//! Calibration runs on inference backends only: under autodiff, `BatchNorm`
//! normalizes with batch statistics and updates its own running state.
//! [`calibrate_statistics_valid`] calibrates the inference copy of an
//! autodiff model.

use crate::models::classifier::ImageClassifier;
use crate::models::sparsity::MeanSparseHost;
use burn::module::AutodiffModule;
use burn::prelude::{Backend, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// Run a calibration pass.
///
/// Resets the statistics of every contained layer, runs every batch
/// forward with calibration enabled, then disables calibration.
///
/// Models without layers, and empty iterators, are returned unchanged.
///
/// # Panics
///
/// If `B` is an autodiff backend; see [`calibrate_statistics_valid`].
///
/// # Arguments
///
/// - `model`: the model to calibrate.
/// - `batches`: ``[batch, channels, height, width]`` input batches.
///
/// # Returns
///
/// The calibrated model.
pub fn calibrate_statistics<B, M, I>(
    model: M,
    batches: I,
) -> M
where
    B: Backend,
    M: ImageClassifier<B>,
    I: IntoIterator<Item = Tensor<B, 4>>,
    I::IntoIter: ExactSizeIterator,
{
    assert!(
        !B::ad_enabled(),
        "calibration requires an inference backend; use calibrate_statistics_valid for autodiff models"
    );

    let batches = batches.into_iter();
    let num_batches = batches.len();

    if num_batches == 0 {
        tracing::warn!("calibration requested with no batches; statistics left unchanged");
        return model;
    }
    let num_layers = model.num_sparse_layers();
    if num_layers == 0 {
        tracing::warn!("calibration requested for a model without MeanSparse layers");
        return model;
    }

    let span = tracing::info_span!("calibrate", num_batches, num_layers);
    let _guard = span.enter();

    let model = model
        .reset_statistics()
        .with_calibration(Some(num_batches));

    for (idx, batch) in batches.enumerate() {
        tracing::debug!(batch = idx, shape = ?batch.dims(), "calibration batch");
        let _ = model.logits(batch);
    }

    let model = model.with_calibration(None);
    tracing::info!("calibration complete");
    model
}

/// Run a calibration pass on the inference copy of an autodiff model.
///
/// # Returns
///
/// The calibrated inference model.
pub fn calibrate_statistics_valid<B, M, I>(
    model: &M,
    batches: I,
) -> M::InnerModule
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    I: IntoIterator<Item = Tensor<B, 4>>,
    I::IntoIter: ExactSizeIterator,
{
    calibrate_statistics(model.valid(), batches.into_iter().map(|batch| batch.inner()))
}
