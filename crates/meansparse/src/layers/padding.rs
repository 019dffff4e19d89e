//! # Fixed "SAME" Padding for 3x3 Convolutions
//!
//! Strided 3x3 convolutions in the robust model families are run with
//! zero explicit padding, and the input is padded by hand to reproduce
//! TensorFlow-style ``SAME`` behavior on even resolutions:
//!
//! * stride 1: ``(left=1, right=1, top=1, bottom=1)``
//! * stride 2: ``(left=0, right=1, top=0, bottom=1)``
//!
//! Other strides are not supported.

use burn::prelude::{Backend, Tensor};

/// The padding ``(left, right, top, bottom)`` for a 3x3 conv of `stride`.
///
/// # Returns
///
/// ``None`` for unsupported strides.
pub fn same_padding_for_stride(stride: usize) -> Option<(usize, usize, usize, usize)> {
    match stride {
        1 => Some((1, 1, 1, 1)),
        2 => Some((0, 1, 0, 1)),
        _ => None,
    }
}

/// Check that `stride` has a "SAME" padding.
pub fn try_validate_stride(stride: usize) -> Result<(), String> {
    match same_padding_for_stride(stride) {
        Some(_) => Ok(()),
        None => Err(format!("Unsupported stride: {stride}; expected 1 or 2")),
    }
}

/// Zero-pad `input` for a 3x3 conv of `stride`.
///
/// # Panics
///
/// If the stride is unsupported.
pub fn pad_same<B: Backend>(
    input: Tensor<B, 4>,
    stride: usize,
) -> Tensor<B, 4> {
    match same_padding_for_stride(stride) {
        Some(padding) => input.pad(padding, 0.0),
        None => panic!("Unsupported stride: {stride}; expected 1 or 2"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use burn::nn::conv::Conv2dConfig;

    #[test]
    fn test_same_padding_for_stride() {
        assert_eq!(same_padding_for_stride(1), Some((1, 1, 1, 1)));
        assert_eq!(same_padding_for_stride(2), Some((0, 1, 0, 1)));
        assert_eq!(same_padding_for_stride(3), None);

        assert!(try_validate_stride(2).is_ok());
        assert_eq!(
            try_validate_stride(4),
            Err("Unsupported stride: 4; expected 1 or 2".to_string())
        );
    }

    #[test]
    fn test_pad_same_conv_resolution() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::ones([1, 2, 8, 8], &device);

        for (stride, expected) in [(1, 8), (2, 4)] {
            let conv = Conv2dConfig::new([2, 3], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_bias(false)
                .init::<B>(&device);

            let padded = pad_same(input.clone(), stride);
            let output = conv.forward(padded);
            assert_eq!(output.dims(), [1, 3, expected, expected]);
        }
    }

    #[test]
    #[should_panic(expected = "Unsupported stride: 3")]
    fn test_pad_same_unsupported() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _ = pad_same(Tensor::<B, 4>::ones([1, 1, 4, 4], &device), 3);
    }
}
