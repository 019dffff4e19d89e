//! # Clean Accuracy

use crate::models::classifier::ImageClassifier;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::ElementConversion;

/// The fraction of samples whose arg-max logit equals the label.
///
/// Samples are evaluated in ``ceil(n / batch_size)`` batches; the last
/// batch may be short.
///
/// # Arguments
///
/// - `model`: the classifier.
/// - `images`: ``[n, channels, height, width]``.
/// - `labels`: ``[n]`` class indices.
/// - `batch_size`: the evaluation batch size.
///
/// # Panics
///
/// If `batch_size` is 0, if there are no samples, or if the number of
/// labels differs from the number of images.
pub fn clean_accuracy<B, M>(
    model: &M,
    images: Tensor<B, 4>,
    labels: Tensor<B, 1, Int>,
    batch_size: usize,
) -> f64
where
    B: Backend,
    M: ImageClassifier<B>,
{
    assert!(batch_size > 0, "batch_size must be > 0");
    let [num_samples, _, _, _] = images.dims();
    let [num_labels] = labels.dims();
    assert!(num_samples > 0, "no samples to evaluate");
    assert_eq!(
        num_samples, num_labels,
        "images and labels differ in length: {num_samples} != {num_labels}"
    );

    let num_batches = num_samples.div_ceil(batch_size);
    let mut correct = 0usize;

    for b in 0..num_batches {
        let start = b * batch_size;
        let len = batch_size.min(num_samples - start);

        let x = images.clone().narrow(0, start, len);
        let y = labels.clone().narrow(0, start, len);

        let predicted = model.logits(x).argmax(1).reshape([len]);
        let batch_correct = predicted
            .equal(y)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;

        tracing::trace!(batch = b, batch_correct, len, "eval batch");
        correct += batch_correct;
    }

    let accuracy = correct as f64 / num_samples as f64;
    tracing::debug!(correct, num_samples, accuracy, "clean accuracy");
    accuracy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::mean_sparse::MeanSparse;
    use crate::models::sparsity::MeanSparseHost;
    use burn::backend::NdArray;
    use burn::module::Module;
    use burn::prelude::TensorData;

    type B = NdArray<f32>;

    /// Predicts the class of the brightest channel.
    #[derive(Module, Clone, Debug)]
    struct BrightestChannel;

    impl MeanSparseHost<B> for BrightestChannel {
        fn visit_mean_sparse<F>(
            &self,
            _f: &mut F,
        ) where
            F: FnMut(&MeanSparse<B>),
        {
        }

        fn map_mean_sparse<F>(
            self,
            _f: &mut F,
        ) -> Self
        where
            F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
        {
            self
        }
    }

    impl ImageClassifier<B> for BrightestChannel {
        fn logits(
            &self,
            input: Tensor<B, 4>,
        ) -> Tensor<B, 2> {
            let [batch, channels, _, _] = input.dims();
            input.mean_dim(3).mean_dim(2).reshape([batch, channels])
        }
    }

    fn one_hot_images(
        classes: &[usize],
        channels: usize,
    ) -> Tensor<B, 4> {
        let device = Default::default();
        let mut values = vec![0.0f32; classes.len() * channels * 4];
        for (i, c) in classes.iter().enumerate() {
            for p in 0..4 {
                values[(i * channels + c) * 4 + p] = 1.0;
            }
        }
        Tensor::from_data(
            TensorData::new(values, [classes.len(), channels, 2, 2]),
            &device,
        )
    }

    #[test]
    fn test_clean_accuracy() {
        let device = Default::default();
        let model = BrightestChannel;

        let images = one_hot_images(&[0, 1, 2, 1, 0], 3);
        let labels = Tensor::<B, 1, Int>::from_ints([0, 1, 0, 1, 2], &device);

        // 3 of 5 correct, over batches of 2, 2 and 1.
        for batch_size in [1, 2, 5, 100] {
            let accuracy = clean_accuracy(&model, images.clone(), labels.clone(), batch_size);
            assert!((accuracy - 0.6).abs() < 1e-12, "{batch_size}: {accuracy}");
        }
    }

    #[test]
    #[should_panic(expected = "batch_size must be > 0")]
    fn test_clean_accuracy_zero_batch() {
        let device = Default::default();
        let model = BrightestChannel;
        let images = one_hot_images(&[0], 2);
        let labels = Tensor::<B, 1, Int>::from_ints([0], &device);
        clean_accuracy(&model, images, labels, 0);
    }

    #[test]
    #[should_panic(expected = "images and labels differ in length")]
    fn test_clean_accuracy_mismatch() {
        let device = Default::default();
        let model = BrightestChannel;
        let images = one_hot_images(&[0, 1], 2);
        let labels = Tensor::<B, 1, Int>::from_ints([0], &device);
        clean_accuracy(&model, images, labels, 1);
    }
}
