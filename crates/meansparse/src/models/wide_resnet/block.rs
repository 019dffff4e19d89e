//! # `WideResNet` Block
//!
//! [`WideResNetBlock`] is the pre-activation residual unit of `WideResNet`,
//! with a [`MeanSparse`] layer after each normalization and after the
//! residual sum.
//!
//! ```text
//! pre = act0(sparse0(norm0(x)))
//! out = conv0(pad_same(pre, stride))
//! out = conv1(act1(sparse1(norm1(out))))
//! res = has_shortcut ? shortcut(pre) : x
//! out = sparse_out(res + out)
//! ```
//!
//! [`WideResNetBlockMeta`] defines a common meta API for [`WideResNetBlock`]
//! and [`WideResNetBlockConfig`].

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::mean_sparse::{AbstractMeanSparseConfig, MeanSparse};
use crate::layers::padding::{pad_same, try_validate_stride};
use crate::models::sparsity::{MeanSparseHost, forward_optional};
use crate::models::util::strided_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`WideResNetBlock`] Meta trait.
pub trait WideResNetBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The stride of the first convolution.
    fn stride(&self) -> usize;

    /// Does the residual path use a projection shortcut?
    fn has_shortcut(&self) -> bool {
        self.in_planes() != self.out_planes()
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`WideResNetBlock`] Config.
///
/// Implements [`WideResNetBlockMeta`].
#[derive(Config, Debug)]
pub struct WideResNetBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// The stride of the first convolution.
    #[config(default = 1)]
    pub stride: usize,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// [`MeanSparse`] policy; ``None`` disables sparsification.
    #[config(default = "Some(AbstractMeanSparseConfig::new())")]
    pub sparsity: Option<AbstractMeanSparseConfig>,
}

impl WideResNetBlockMeta for WideResNetBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl WideResNetBlockConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        try_validate_stride(self.stride)?;
        if self.stride != 1 && !self.has_shortcut() {
            return Err(format!(
                "stride {} requires a shortcut; in_planes == out_planes == {}",
                self.stride, self.in_planes
            ));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`WideResNetBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> WideResNetBlock<B> {
        self.expect_valid();

        let in_planes = self.in_planes;
        let out_planes = self.out_planes;
        let stride = self.stride;

        let sparse = |features: usize| {
            self.sparsity
                .as_ref()
                .map(|policy| policy.build_config(features).init(device))
        };

        WideResNetBlock {
            norm0: BatchNormConfig::new(in_planes).init(device),
            sparse0: sparse(in_planes),
            act0: self.activation.init(device),
            conv0: Conv2dConfig::new([in_planes, out_planes], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_bias(false)
                .init(device),

            norm1: BatchNormConfig::new(out_planes).init(device),
            sparse1: sparse(out_planes),
            act1: self.activation.init(device),
            conv1: Conv2dConfig::new([out_planes, out_planes], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),

            shortcut: if self.has_shortcut() {
                Conv2dConfig::new([in_planes, out_planes], [1, 1])
                    .with_stride([stride, stride])
                    .with_padding(PaddingConfig2d::Explicit(0, 0))
                    .with_bias(false)
                    .init(device)
                    .into()
            } else {
                None
            },

            sparse_out: sparse(out_planes),
        }
    }
}

/// `WideResNet` residual block.
///
/// Implements [`WideResNetBlockMeta`].
#[derive(Module, Debug)]
pub struct WideResNetBlock<B: Backend> {
    /// Input norm.
    pub norm0: BatchNorm<B, 2>,
    /// Input sparsification.
    pub sparse0: Option<MeanSparse<B>>,
    /// Input activation.
    pub act0: Activation<B>,
    /// Strided 3x3 conv; padded by hand.
    pub conv0: Conv2d<B>,

    /// Inner norm.
    pub norm1: BatchNorm<B, 2>,
    /// Inner sparsification.
    pub sparse1: Option<MeanSparse<B>>,
    /// Inner activation.
    pub act1: Activation<B>,
    /// 3x3 conv.
    pub conv1: Conv2d<B>,

    /// Optional 1x1 projection for the residual path.
    pub shortcut: Option<Conv2d<B>>,

    /// Sparsification of the residual sum.
    pub sparse_out: Option<MeanSparse<B>>,
}

impl<B: Backend> WideResNetBlockMeta for WideResNetBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv0.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv0.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv0.stride[0]
    }

    fn has_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> MeanSparseHost<B> for WideResNetBlock<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.sparse0.visit_mean_sparse(f);
        self.sparse1.visit_mean_sparse(f);
        self.sparse_out.visit_mean_sparse(f);
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        Self {
            sparse0: self.sparse0.map_mean_sparse(f),
            sparse1: self.sparse1.map_mean_sparse(f),
            sparse_out: self.sparse_out.map_mean_sparse(f),
            ..self
        }
    }
}

impl<B: Backend> WideResNetBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let x = self.norm0.forward(input.clone());
        let x = forward_optional(&self.sparse0, x);
        let pre = self.act0.forward(x);

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(pre.clone()),
            None => input,
        };

        let x = self.conv0.forward(pad_same(pre, self.stride()));

        let x = self.norm1.forward(x);
        let x = forward_optional(&self.sparse1, x);
        let x = self.act1.forward(x);
        let x = self.conv1.forward(x);

        let x = forward_optional(&self.sparse_out, identity + x);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::mean_sparse::MeanSparseMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_block_config() {
        let config = WideResNetBlockConfig::new(16, 32);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 1);
        assert!(config.has_shortcut());
        assert!(config.sparsity.is_some());
        assert!(matches!(config.activation, ActivationConfig::Relu));
        assert_eq!(config.output_resolution([16, 16]), [16, 16]);

        let config = config.with_stride(2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
        assert!(config.try_validate().is_ok());
    }

    #[test]
    fn test_block_config_validation() {
        assert_eq!(
            WideResNetBlockConfig::new(16, 16)
                .with_stride(2)
                .try_validate(),
            Err("stride 2 requires a shortcut; in_planes == out_planes == 16".to_string())
        );
        assert_eq!(
            WideResNetBlockConfig::new(16, 32)
                .with_stride(3)
                .try_validate(),
            Err("Unsupported stride: 3; expected 1 or 2".to_string())
        );
    }

    #[test]
    fn test_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: WideResNetBlock<B> = WideResNetBlockConfig::new(4, 8)
            .with_stride(2)
            .init(&device);

        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 8);
        assert_eq!(block.stride(), 2);
        assert!(block.has_shortcut());
        assert_eq!(block.num_sparse_layers(), 3);

        let mut features = Vec::new();
        block.visit_mean_sparse(&mut |layer| features.push(layer.num_features()));
        assert_eq!(features, vec![4, 8, 8]);

        let block: WideResNetBlock<B> = WideResNetBlockConfig::new(8, 8)
            .with_sparsity(None)
            .init(&device);
        assert!(!block.has_shortcut());
        assert_eq!(block.num_sparse_layers(), 0);
    }

    #[test]
    fn test_block_forward_shortcut_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: WideResNetBlock<B> = WideResNetBlockConfig::new(2, 4)
            .with_stride(2)
            .init(&device);

        let input = Tensor::ones([2, 2, 8, 8], &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 4),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );
    }

    #[test]
    fn test_zero_threshold_matches_unsparsified() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: WideResNetBlock<B> = WideResNetBlockConfig::new(3, 3)
            .with_activation(ActivationConfig::Swish)
            .init(&device);
        let plain = WideResNetBlock {
            sparse0: None,
            sparse1: None,
            sparse_out: None,
            ..block.clone()
        };

        let input: Tensor<B, 4> = Tensor::random(
            [2, 3, 6, 6],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        block
            .forward(input.clone())
            .to_data()
            .assert_eq(&plain.forward(input).to_data(), true);
    }
}
