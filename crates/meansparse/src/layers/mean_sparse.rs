//! # `MeanSparse` - Mean-Centered Channel Sparsification
//!
//! A [`MeanSparse`] layer tracks a per-channel running mean and variance,
//! and replaces every activation that falls within `threshold` running
//! standard deviations of its channel mean with the mean itself:
//!
//! ```text
//! bias = running_mean[c]
//! crop = threshold * sqrt(running_var[c])
//! out  = |x - bias| < crop ? bias : x
//! ```
//!
//! The running statistics are not learned; they are accumulated during a
//! calibration pass (see [`MeanSparse::with_calibration`] and
//! [`crate::calibrate`]), where each of `N` batches contributes
//! ``mean(batch) / N`` and ``var(batch) / N``.
//!
//! [`MeanSparseConfig`] implements [`Config`], and provides
//! [`MeanSparseConfig::init`] to initialize a [`MeanSparse`].

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module, RunningState};
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

/// Gradient behavior of the sparsification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SparseGradient {
    /// Gradients flow only through the activations that were kept.
    ///
    /// Replaced activations are constants, and receive no gradient.
    #[default]
    Masked,

    /// Straight-through estimator.
    ///
    /// The forward value is sparsified, but the backward pass is the identity.
    StraightThrough,
}

/// Abstract policy for [`MeanSparse`] layers.
///
/// Carries everything but the feature size, and can be lifted to a
/// [`MeanSparseConfig`] for a concrete channel count.
#[derive(Config, Debug)]
pub struct AbstractMeanSparseConfig {
    /// Initial sparsification threshold, in running standard deviations.
    #[config(default = 0.0)]
    pub threshold: f64,

    /// Gradient behavior.
    #[config(default = "SparseGradient::Masked")]
    pub gradient: SparseGradient,
}

impl Default for AbstractMeanSparseConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractMeanSparseConfig {
    /// Build a [`MeanSparseConfig`] matched to `num_features`.
    pub fn build_config(
        &self,
        num_features: usize,
    ) -> MeanSparseConfig {
        MeanSparseConfig::new(num_features)
            .with_threshold(self.threshold)
            .with_gradient(self.gradient)
    }
}

/// [`MeanSparse`] Meta trait.
pub trait MeanSparseMeta {
    /// The number of channels.
    fn num_features(&self) -> usize;

    /// The gradient behavior.
    fn gradient(&self) -> SparseGradient;
}

/// [`MeanSparse`] Config.
///
/// Implements [`MeanSparseMeta`].
#[derive(Config, Debug)]
pub struct MeanSparseConfig {
    /// The number of channels.
    pub num_features: usize,

    /// Initial sparsification threshold, in running standard deviations.
    #[config(default = 0.0)]
    pub threshold: f64,

    /// Gradient behavior.
    #[config(default = "SparseGradient::Masked")]
    pub gradient: SparseGradient,
}

impl MeanSparseMeta for MeanSparseConfig {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn gradient(&self) -> SparseGradient {
        self.gradient
    }
}

impl MeanSparseConfig {
    /// Initialize a [`MeanSparse`] layer.
    ///
    /// Running statistics start at zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MeanSparse<B> {
        assert!(self.num_features > 0, "num_features must be > 0");
        assert_threshold(self.threshold);

        MeanSparse {
            running_mean: RunningState::new(Tensor::zeros([self.num_features], device)),
            running_var: RunningState::new(Tensor::zeros([self.num_features], device)),
            threshold: RunningState::new(Tensor::full([1], self.threshold, device)),
            gradient: Ignored(self.gradient),
            calibration: Ignored(None),
        }
    }
}

fn assert_threshold(threshold: f64) {
    assert!(
        threshold.is_finite() && threshold >= 0.0,
        "threshold must be finite and >= 0: {threshold}"
    );
}

/// Mean-centered channel sparsification layer.
///
/// Implements [`MeanSparseMeta`].
#[derive(Module, Debug)]
pub struct MeanSparse<B: Backend> {
    /// Per-channel running mean; ``[num_features]``.
    pub running_mean: RunningState<Tensor<B, 1>>,

    /// Per-channel running (unbiased) variance; ``[num_features]``.
    pub running_var: RunningState<Tensor<B, 1>>,

    /// Threshold, in running standard deviations; ``[1]``.
    pub threshold: RunningState<Tensor<B, 1>>,

    /// Gradient behavior.
    pub gradient: Ignored<SparseGradient>,

    /// When set, the number of batches in the active calibration pass.
    pub calibration: Ignored<Option<usize>>,
}

impl<B: Backend> MeanSparseMeta for MeanSparse<B> {
    fn num_features(&self) -> usize {
        self.running_mean.value().dims()[0]
    }

    fn gradient(&self) -> SparseGradient {
        self.gradient.0
    }
}

impl<B: Backend> MeanSparse<B> {
    /// Read the current threshold.
    ///
    /// This synchronizes with the device.
    pub fn threshold(&self) -> f64 {
        self.threshold.value().into_scalar().elem::<f64>()
    }

    /// Replace the threshold.
    ///
    /// # Panics
    ///
    /// If `threshold` is negative or not finite.
    pub fn with_threshold(
        self,
        threshold: f64,
    ) -> Self {
        assert_threshold(threshold);
        let device = self.running_mean.value().device();
        Self {
            threshold: RunningState::new(Tensor::full([1], threshold, &device)),
            ..self
        }
    }

    /// Replace the gradient behavior.
    pub fn with_gradient(
        self,
        gradient: SparseGradient,
    ) -> Self {
        Self {
            gradient: Ignored(gradient),
            ..self
        }
    }

    /// Is a calibration pass active?
    pub fn is_calibrating(&self) -> bool {
        self.calibration.0.is_some()
    }

    /// Enable (``Some(num_batches)``) or disable (``None``) calibration.
    ///
    /// While enabled, every forward pass adds ``1 / num_batches`` of the
    /// batch statistics to the running statistics.
    ///
    /// # Panics
    ///
    /// If `num_batches` is ``Some(0)``.
    pub fn with_calibration(
        self,
        num_batches: Option<usize>,
    ) -> Self {
        if let Some(n) = num_batches {
            assert!(n > 0, "calibration requires at least one batch");
        }
        Self {
            calibration: Ignored(num_batches),
            ..self
        }
    }

    /// Zero the running statistics.
    pub fn reset_statistics(self) -> Self {
        let num_features = self.num_features();
        let device = self.running_mean.value().device();
        Self {
            running_mean: RunningState::new(Tensor::zeros([num_features], &device)),
            running_var: RunningState::new(Tensor::zeros([num_features], &device)),
            ..self
        }
    }

    /// Replace the running statistics.
    ///
    /// # Arguments
    ///
    /// - `mean`: ``[num_features]``.
    /// - `var`: ``[num_features]``, non-negative.
    pub fn with_statistics(
        self,
        mean: Tensor<B, 1>,
        var: Tensor<B, 1>,
    ) -> Self {
        let num_features = self.num_features();
        assert_eq!(mean.dims(), [num_features], "mean shape mismatch");
        assert_eq!(var.dims(), [num_features], "var shape mismatch");
        Self {
            running_mean: RunningState::new(mean.detach()),
            running_var: RunningState::new(var.detach()),
            ..self
        }
    }

    /// The current ``(running_mean, running_var)``.
    ///
    /// Includes updates made by calibration forward passes on this thread.
    pub fn statistics(&self) -> (Tensor<B, 1>, Tensor<B, 1>) {
        (self.running_mean.value_sync(), self.running_var.value_sync())
    }

    /// Forward pass.
    ///
    /// Accumulates statistics first when calibrating, then sparsifies.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, num_features, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_features, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_batch, _height, _width] = unpack_shape_contract!(
            ["batch", "num_features", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("num_features", self.num_features())],
        );

        if let Some(num_batches) = self.calibration.0 {
            self.accumulate_statistics(input.clone(), num_batches);
        }

        self.sparsify(input)
    }

    /// Sparsify without touching the running statistics.
    pub fn sparsify(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let shape = input.dims();
        let channels = shape[1];

        let (mean, var) = self.statistics();
        let crop = (var.sqrt() * self.threshold.value())
            .reshape([1, channels, 1, 1])
            .expand(shape);
        let bias = mean.reshape([1, channels, 1, 1]).expand(shape);

        let mask = (input.clone() - bias.clone()).abs().lower(crop);
        let sparse = input.clone().mask_where(mask, bias);

        match self.gradient.0 {
            SparseGradient::Masked => sparse,
            SparseGradient::StraightThrough => input.clone() + (sparse - input).detach(),
        }
    }

    fn accumulate_statistics(
        &self,
        input: Tensor<B, 4>,
        num_batches: usize,
    ) {
        let [batch, channels, height, width] = input.dims();
        let population = batch * height * width;

        // [B, C, H, W] -> [C, B*H*W]
        let x = input
            .detach()
            .swap_dims(0, 1)
            .reshape([channels, population]);

        let scale = 1.0 / num_batches as f64;
        tracing::trace!(batch, channels, population, num_batches, "MeanSparse accumulate");

        let batch_mean = x.clone().mean_dim(1).reshape([channels]);
        let mean = self.running_mean.value_sync() + batch_mean.mul_scalar(scale);
        self.running_mean.update(mean.detach());

        if population < 2 {
            tracing::warn!(
                population,
                "MeanSparse calibration batch too small for an unbiased variance; skipping"
            );
            return;
        }
        let batch_var = x.var(1).reshape([channels]);
        let var = self.running_var.value_sync() + batch_var.mul_scalar(scale);
        self.running_var.update(var.detach());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;
    type AB = Autodiff<NdArray<f32>>;

    fn unit_layer<B: Backend>(
        threshold: f64,
        gradient: SparseGradient,
        device: &B::Device,
    ) -> MeanSparse<B> {
        MeanSparseConfig::new(1)
            .with_threshold(threshold)
            .with_gradient(gradient)
            .init(device)
            .with_statistics(
                Tensor::from_floats([0.0], device),
                Tensor::from_floats([1.0], device),
            )
    }

    #[test]
    fn test_config() {
        let config = AbstractMeanSparseConfig::new()
            .with_threshold(0.25)
            .build_config(8);
        assert_eq!(config.num_features(), 8);
        assert_eq!(config.gradient(), SparseGradient::Masked);

        let device = Default::default();
        let layer: MeanSparse<B> = config.init(&device);
        assert_eq!(layer.num_features(), 8);
        assert_eq!(layer.threshold(), 0.25);
        assert!(!layer.is_calibrating());

        let (mean, var) = layer.statistics();
        mean.to_data().assert_eq(&TensorData::from([0.0f32; 8]), true);
        var.to_data().assert_eq(&TensorData::from([0.0f32; 8]), true);
    }

    #[test]
    #[should_panic(expected = "threshold must be finite and >= 0")]
    fn test_negative_threshold() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(2).init(&device);
        let _ = layer.with_threshold(-1.0);
    }

    #[test]
    #[should_panic(expected = "calibration requires at least one batch")]
    fn test_zero_batch_calibration() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(2).init(&device);
        let _ = layer.with_calibration(Some(0));
    }

    #[test]
    fn test_zero_threshold_is_identity() {
        let device = Default::default();
        let layer: MeanSparse<B> = unit_layer(0.0, SparseGradient::Masked, &device);

        let input: Tensor<B, 4> =
            Tensor::from_floats([[[[-1.0, -0.25], [0.0, 2.0]]]], &device);
        let output = layer.forward(input.clone());

        output.to_data().assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_sparsify_replaces_near_mean() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(2)
            .with_threshold(0.5)
            .init(&device)
            .with_statistics(
                Tensor::from_floats([1.0, -2.0], &device),
                Tensor::from_floats([4.0, 0.0], &device),
            );

        // Channel 0: bias 1, crop 1; channel 1: crop 0, nothing replaced.
        let input: Tensor<B, 4> = Tensor::from_floats(
            [[[[0.5, 2.0], [1.5, -0.5]], [[-2.0, -1.5], [0.0, 3.0]]]],
            &device,
        );
        let output = layer.forward(input);

        output.to_data().assert_eq(
            &TensorData::from([[[[1.0f32, 2.0], [1.0, -0.5]], [[-2.0, -1.5], [0.0, 3.0]]]]),
            true,
        );
    }

    #[test]
    fn test_masked_gradient() {
        let device = Default::default();
        let layer: MeanSparse<AB> = unit_layer(0.5, SparseGradient::Masked, &device);

        let input: Tensor<AB, 4> =
            Tensor::from_floats([[[[-1.0, -0.25], [0.1, 2.0]]]], &device).require_grad();
        let output = layer.forward(input.clone());

        output
            .to_data()
            .assert_eq(&TensorData::from([[[[-1.0f32, 0.0], [0.0, 2.0]]]]), true);

        let grads = output.sum().backward();
        let grad = input.grad(&grads).unwrap();
        grad.to_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 0.0], [0.0, 1.0]]]]), true);
    }

    #[test]
    fn test_straight_through_gradient() {
        let device = Default::default();
        let layer: MeanSparse<AB> = unit_layer(0.5, SparseGradient::StraightThrough, &device);

        let input: Tensor<AB, 4> =
            Tensor::from_floats([[[[-1.0, -0.25], [0.25, 2.0]]]], &device).require_grad();
        let output = layer.forward(input.clone());

        output
            .to_data()
            .assert_eq(&TensorData::from([[[[-1.0f32, 0.0], [0.0, 2.0]]]]), true);

        let grads = output.sum().backward();
        let grad = input.grad(&grads).unwrap();
        grad.to_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 1.0], [1.0, 1.0]]]]), true);
    }

    #[test]
    fn test_calibration_averages_batches() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(1)
            .init(&device)
            .with_calibration(Some(2));
        assert!(layer.is_calibrating());

        // mean 1, unbiased var 4/3
        let a: Tensor<B, 4> = Tensor::from_floats([[[[0.0, 2.0], [0.0, 2.0]]]], &device);
        // mean 3, var 0
        let b: Tensor<B, 4> = Tensor::from_floats([[[[3.0, 3.0], [3.0, 3.0]]]], &device);

        let _ = layer.forward(a);
        let _ = layer.forward(b);

        let (mean, var) = layer.statistics();
        let mean = mean.into_data().to_vec::<f32>().unwrap();
        let var = var.into_data().to_vec::<f32>().unwrap();

        assert_that!(mean[0], close_to(2.0, 1e-6));
        assert_that!(var[0], close_to(2.0 / 3.0, 1e-6));

        let layer = layer.with_calibration(None);
        let _ = layer.forward(Tensor::ones([1, 1, 2, 2], &device));
        let (mean, _) = layer.statistics();
        assert_that!(
            mean.into_data().to_vec::<f32>().unwrap()[0],
            close_to(2.0, 1e-6)
        );
    }

    #[test]
    fn test_calibration_sparsifies_with_current_batch() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(1)
            .with_threshold(1.0)
            .init(&device)
            .with_calibration(Some(1));

        // mean 1, std sqrt(4/3) > 1; every |x - 1| == 1 is inside the crop.
        let input: Tensor<B, 4> = Tensor::from_floats([[[[0.0, 2.0], [0.0, 2.0]]]], &device);
        let output = layer.forward(input);

        output
            .to_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 1.0], [1.0, 1.0]]]]), true);
    }

    #[test]
    fn test_statistics_visible_after_calibration() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(1)
            .init(&device)
            .with_calibration(Some(1));

        let _ = layer.forward(Tensor::from_floats([[[[0.0, 2.0], [0.0, 2.0]]]], &device));
        let layer = layer.with_calibration(None).with_threshold(1.0);

        let (mean, _) = layer.statistics();
        mean.to_data().assert_eq(&TensorData::from([1.0f32]), true);

        let live = layer.forward(Tensor::from_floats([[[[0.5, 3.0], [1.5, -1.0]]]], &device));

        let reloaded: MeanSparse<B> = MeanSparseConfig::new(1)
            .init(&device)
            .load_record(layer.clone().into_record());
        let saved = reloaded.forward(Tensor::from_floats([[[[0.5, 3.0], [1.5, -1.0]]]], &device));

        live.to_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 3.0], [1.0, -1.0]]]]), true);
        live.to_data().assert_eq(&saved.to_data(), true);
    }

    #[test]
    fn test_calibration_ignores_gradients() {
        let device = Default::default();
        let layer: MeanSparse<AB> = MeanSparseConfig::new(1)
            .init(&device)
            .with_calibration(Some(1));

        let input: Tensor<AB, 4> =
            Tensor::from_floats([[[[0.0, 2.0], [0.0, 2.0]]]], &device).require_grad();
        let output = layer.forward(input.clone());

        let grads = output.sum().backward();
        let grad = input.grad(&grads).unwrap();
        grad.to_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 1.0], [1.0, 1.0]]]]), true);

        let (mean, _) = layer.statistics();
        mean.to_data().assert_eq(&TensorData::from([1.0f32]), true);
    }

    #[test]
    fn test_single_element_population_skips_variance() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(1)
            .init(&device)
            .with_calibration(Some(1));

        let _ = layer.forward(Tensor::full([1, 1, 1, 1], 5.0, &device));

        let (mean, var) = layer.statistics();
        mean.to_data().assert_eq(&TensorData::from([5.0f32]), true);
        var.to_data().assert_eq(&TensorData::from([0.0f32]), true);
    }

    #[test]
    fn test_reset_and_record_roundtrip() {
        let device = Default::default();
        let layer: MeanSparse<B> = unit_layer(0.75, SparseGradient::Masked, &device);

        let record = layer.clone().into_record();
        let reloaded: MeanSparse<B> = MeanSparseConfig::new(1).init(&device).load_record(record);
        assert_eq!(reloaded.threshold(), 0.75);
        let (_, var) = reloaded.statistics();
        var.to_data().assert_eq(&TensorData::from([1.0f32]), true);

        let reset = layer.reset_statistics();
        let (mean, var) = reset.statistics();
        mean.to_data().assert_eq(&TensorData::from([0.0f32]), true);
        var.to_data().assert_eq(&TensorData::from([0.0f32]), true);
        assert_eq!(reset.threshold(), 0.75);
    }

    #[test]
    #[should_panic]
    fn test_channel_mismatch() {
        let device = Default::default();
        let layer: MeanSparse<B> = MeanSparseConfig::new(3).init(&device);
        let _ = layer.forward(Tensor::zeros([1, 2, 4, 4], &device));
    }
}
