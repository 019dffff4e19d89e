//! # Model-Wide `MeanSparse` Control
//!
//! [`MeanSparseHost`] is implemented by every module which contains
//! [`MeanSparse`] layers; it provides visiting and mapping over the
//! contained layers, and derives the model-wide threshold, gradient,
//! calibration and reset operations from them.

use crate::layers::mean_sparse::{MeanSparse, SparseGradient};
use burn::prelude::{Backend, Tensor};

/// Apply an optional [`MeanSparse`] layer; ``None`` is the identity.
pub fn forward_optional<B: Backend>(
    layer: &Option<MeanSparse<B>>,
    input: Tensor<B, 4>,
) -> Tensor<B, 4> {
    match layer {
        Some(layer) => layer.forward(input),
        None => input,
    }
}

/// A module containing [`MeanSparse`] layers.
pub trait MeanSparseHost<B: Backend>: Sized {
    /// Visit every contained layer, in forward order.
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>);

    /// Map every contained layer, in forward order.
    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>;

    /// The number of contained layers.
    fn num_sparse_layers(&self) -> usize {
        let mut count = 0;
        self.visit_mean_sparse(&mut |_| count += 1);
        count
    }

    /// The thresholds of the contained layers, in forward order.
    fn thresholds(&self) -> Vec<f64> {
        let mut thresholds = Vec::new();
        self.visit_mean_sparse(&mut |layer| thresholds.push(layer.threshold()));
        thresholds
    }

    /// Is any contained layer calibrating?
    fn is_calibrating(&self) -> bool {
        let mut calibrating = false;
        self.visit_mean_sparse(&mut |layer| calibrating |= layer.is_calibrating());
        calibrating
    }

    /// Set the threshold of every contained layer.
    fn with_threshold(
        self,
        threshold: f64,
    ) -> Self {
        self.map_mean_sparse(&mut |layer| layer.with_threshold(threshold))
    }

    /// Set the gradient behavior of every contained layer.
    fn with_sparse_gradient(
        self,
        gradient: SparseGradient,
    ) -> Self {
        self.map_mean_sparse(&mut |layer| layer.with_gradient(gradient))
    }

    /// Enable or disable calibration on every contained layer.
    fn with_calibration(
        self,
        num_batches: Option<usize>,
    ) -> Self {
        self.map_mean_sparse(&mut |layer| layer.with_calibration(num_batches))
    }

    /// Zero the running statistics of every contained layer.
    fn reset_statistics(self) -> Self {
        self.map_mean_sparse(&mut |layer| layer.reset_statistics())
    }
}

impl<B: Backend> MeanSparseHost<B> for MeanSparse<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        f(self)
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        f(self)
    }
}

impl<B: Backend, T: MeanSparseHost<B>> MeanSparseHost<B> for Option<T> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        if let Some(inner) = self {
            inner.visit_mean_sparse(f);
        }
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        self.map(|inner| inner.map_mean_sparse(f))
    }
}

impl<B: Backend, T: MeanSparseHost<B>> MeanSparseHost<B> for Vec<T> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.iter().for_each(|inner| inner.visit_mean_sparse(f));
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        self.into_iter()
            .map(|inner| inner.map_mean_sparse(f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::mean_sparse::{MeanSparseConfig, MeanSparseMeta};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_collection_hosts() {
        let device = Default::default();

        let layers: Vec<Option<MeanSparse<B>>> = vec![
            Some(MeanSparseConfig::new(2).init(&device)),
            None,
            Some(MeanSparseConfig::new(3).with_threshold(0.5).init(&device)),
        ];
        assert_eq!(layers.num_sparse_layers(), 2);
        assert_eq!(layers.thresholds(), vec![0.0, 0.5]);
        assert!(!layers.is_calibrating());

        let layers = layers
            .with_threshold(0.25)
            .with_sparse_gradient(SparseGradient::StraightThrough)
            .with_calibration(Some(4));
        assert_eq!(layers.thresholds(), vec![0.25, 0.25]);
        assert!(layers.is_calibrating());

        let mut features = Vec::new();
        layers.visit_mean_sparse(&mut |layer| {
            assert_eq!(layer.gradient(), SparseGradient::StraightThrough);
            features.push(layer.num_features());
        });
        assert_eq!(features, vec![2, 3]);

        let layers = layers.with_calibration(None);
        assert!(!layers.is_calibrating());
    }
}
