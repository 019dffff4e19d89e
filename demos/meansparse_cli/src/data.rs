//! Image folder loading.

use anyhow::{Context, bail};
use burn::data::dataset::Dataset;
use burn::data::dataset::transform::{PartialDataset, ShuffledDataset};
use burn::data::dataset::vision::{Annotation, ImageFolderDataset, PixelDepth};
use burn::prelude::{Backend, Int, Tensor, TensorData};
use std::path::Path;

/// Expected image side.
pub const IMAGE_SIZE: usize = 32;

/// Expected image channels.
pub const IMAGE_CHANNELS: usize = 3;

/// A seeded random subset of at most `limit` items.
///
/// Image folders list items grouped by class; shuffling before the cut
/// keeps every class represented in a small subset.
pub fn sample_subset<D, I>(
    dataset: D,
    limit: Option<usize>,
    seed: u64,
) -> PartialDataset<ShuffledDataset<D, I>, I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    let len = dataset.len();
    let num_samples = limit.map_or(len, |n| n.min(len));
    PartialDataset::new(ShuffledDataset::with_seed(dataset, seed), 0, num_samples)
}

/// Load a ``<root>/<class>/<image>`` folder of ``32x32`` RGB images.
///
/// With a `limit`, a `seed`-determined random subset is loaded.
///
/// # Returns
///
/// ``([n, 3, 32, 32]`` images in ``[0, 1]``, ``[n]`` labels``)``.
pub fn load_image_folder<B: Backend>(
    root: &Path,
    limit: Option<usize>,
    seed: u64,
    device: &B::Device,
) -> anyhow::Result<(Tensor<B, 4>, Tensor<B, 1, Int>)> {
    let dataset = ImageFolderDataset::new_classification(root)
        .with_context(|| format!("reading image folder {}", root.display()))?;
    let dataset = sample_subset(dataset, limit, seed);

    let num_samples = dataset.len();
    if num_samples == 0 {
        bail!("no images in {}", root.display());
    }
    tracing::info!(root = %root.display(), num_samples, seed, "loading images");

    let pixels_per_image = IMAGE_SIZE * IMAGE_SIZE * IMAGE_CHANNELS;
    let mut pixels = Vec::with_capacity(num_samples * pixels_per_image);
    let mut labels = Vec::with_capacity(num_samples);

    for idx in 0..num_samples {
        let Some(item) = dataset.get(idx) else {
            bail!("missing image {idx}");
        };
        if item.image.len() != pixels_per_image {
            bail!(
                "{}: expected a {IMAGE_SIZE}x{IMAGE_SIZE} RGB image ({pixels_per_image} values); found {}",
                item.image_path,
                item.image.len()
            );
        }
        pixels.extend(item.image.iter().map(|p| match p {
            PixelDepth::U8(v) => *v as f32 / 255.0,
            PixelDepth::U16(v) => *v as f32 / 65535.0,
            PixelDepth::F32(v) => *v,
        }));
        match item.annotation {
            Annotation::Label(label) => labels.push(label as i64),
            other => bail!("{}: unsupported annotation {other:?}", item.image_path),
        }
    }

    // [n, H, W, C] -> [n, C, H, W]
    let images = Tensor::<B, 4>::from_data(
        TensorData::new(
            pixels,
            [num_samples, IMAGE_SIZE, IMAGE_SIZE, IMAGE_CHANNELS],
        ),
        device,
    )
    .permute([0, 3, 1, 2]);
    let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [num_samples]), device);

    Ok((images, labels))
}

/// Split ``[n, ...]`` images into batches of at most `batch_size`.
pub fn into_batches<B: Backend>(
    images: Tensor<B, 4>,
    batch_size: usize,
) -> Vec<Tensor<B, 4>> {
    let [n, _, _, _] = images.dims();
    (0..n.div_ceil(batch_size))
        .map(|b| {
            let start = b * batch_size;
            images
                .clone()
                .narrow(0, start, batch_size.min(n - start))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;
    use std::collections::HashSet;

    fn grouped_labels() -> InMemDataset<usize> {
        // 10 classes of 100 items, grouped by class.
        InMemDataset::new((0..1000).map(|idx| idx / 100).collect())
    }

    #[test]
    fn test_sample_subset_mixes_classes() {
        let subset = sample_subset(grouped_labels(), Some(100), 42);
        assert_eq!(subset.len(), 100);

        let classes: HashSet<usize> = subset.iter().collect();
        assert!(classes.len() > 5, "{classes:?}");
    }

    #[test]
    fn test_sample_subset_is_seeded() {
        let a: Vec<usize> = sample_subset(grouped_labels(), Some(20), 7).iter().collect();
        let b: Vec<usize> = sample_subset(grouped_labels(), Some(20), 7).iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_subset_limits() {
        assert_eq!(sample_subset(grouped_labels(), None, 0).len(), 1000);
        assert_eq!(sample_subset(grouped_labels(), Some(5000), 0).len(), 1000);
        assert_eq!(sample_subset(grouped_labels(), Some(0), 0).len(), 0);
    }
}
