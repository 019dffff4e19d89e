//! # Pre-Activation `ResNet` Block
//!
//! ```text
//! out = act0(sparse0(norm0(x)))
//! res = has_shortcut ? shortcut(pad_same(x, stride)) : x
//! out = conv1(pad_same(out, stride))
//! out = conv2(act1(sparse1(norm1(out))))
//! out = out + res
//! ```
//!
//! Unlike the `WideResNet` block, the shortcut is a 3x3 convolution, and
//! it reads the raw block input.

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::mean_sparse::{AbstractMeanSparseConfig, MeanSparse};
use crate::layers::padding::{pad_same, try_validate_stride};
use crate::models::sparsity::{MeanSparseHost, forward_optional};
use crate::models::util::strided_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PreActBlock`] Meta trait.
pub trait PreActBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The stride of the block.
    fn stride(&self) -> usize;

    /// Does the residual path use a projection shortcut?
    fn has_shortcut(&self) -> bool {
        self.stride() != 1 || self.in_planes() != self.out_planes()
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

/// [`PreActBlock`] Config.
#[derive(Config, Debug)]
pub struct PreActBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// The stride of the block.
    #[config(default = 1)]
    pub stride: usize,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// [`MeanSparse`] policy; ``None`` (the default) disables sparsification.
    #[config(default = "None")]
    pub sparsity: Option<AbstractMeanSparseConfig>,
}

impl PreActBlockMeta for PreActBlockConfig {
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

impl PreActBlockConfig {
    /// Build the configs for a layer of `num_blocks` blocks.
    pub fn build_layer(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        stride: usize,
        activation: ActivationConfig,
        sparsity: Option<AbstractMeanSparseConfig>,
    ) -> Vec<Self> {
        (0..num_blocks)
            .map(|b| {
                let (in_planes, stride) = if b == 0 {
                    (in_planes, stride)
                } else {
                    (out_planes, 1)
                };
                Self::new(in_planes, out_planes)
                    .with_stride(stride)
                    .with_activation(activation.clone())
                    .with_sparsity(sparsity.clone())
            })
            .collect()
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        try_validate_stride(self.stride)
    }

    /// Initialize a [`PreActBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PreActBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        let in_planes = self.in_planes;
        let out_planes = self.out_planes;
        let stride = self.stride;

        let sparse = |features: usize| {
            self.sparsity
                .as_ref()
                .map(|policy| policy.build_config(features).init(device))
        };
        let conv3x3 = |in_planes: usize, stride: usize, padding: usize| {
            Conv2dConfig::new([in_planes, out_planes], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false)
                .init(device)
        };

        PreActBlock {
            norm0: BatchNormConfig::new(in_planes).init(device),
            sparse0: sparse(in_planes),
            act0: self.activation.init(device),
            conv1: conv3x3(in_planes, stride, 0),

            norm1: BatchNormConfig::new(out_planes).init(device),
            sparse1: sparse(out_planes),
            act1: self.activation.init(device),
            conv2: conv3x3(out_planes, 1, 1),

            shortcut: if self.has_shortcut() {
                Some(conv3x3(in_planes, stride, 0))
            } else {
                None
            },
        }
    }
}

/// Pre-activation residual block.
#[derive(Module, Debug)]
pub struct PreActBlock<B: Backend> {
    /// Input norm.
    pub norm0: BatchNorm<B, 2>,
    /// Optional input sparsification.
    pub sparse0: Option<MeanSparse<B>>,
    /// Input activation.
    pub act0: Activation<B>,
    /// Strided 3x3 conv; padded by hand.
    pub conv1: Conv2d<B>,

    /// Inner norm.
    pub norm1: BatchNorm<B, 2>,
    /// Optional inner sparsification.
    pub sparse1: Option<MeanSparse<B>>,
    /// Inner activation.
    pub act1: Activation<B>,
    /// 3x3 conv.
    pub conv2: Conv2d<B>,

    /// Optional strided 3x3 projection; padded by hand.
    pub shortcut: Option<Conv2d<B>>,
}

impl<B: Backend> PreActBlockMeta for PreActBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv1.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv1.stride[0]
    }

    fn has_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> MeanSparseHost<B> for PreActBlock<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.sparse0.visit_mean_sparse(f);
        self.sparse1.visit_mean_sparse(f);
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
            ..self
        }
    }
}

impl<B: Backend> PreActBlock<B> {
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
        let x = self.act0.forward(x);

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(pad_same(input, self.stride())),
            None => input,
        };

        let x = self.conv1.forward(pad_same(x, self.stride()));

        let x = self.norm1.forward(x);
        let x = forward_optional(&self.sparse1, x);
        let x = self.act1.forward(x);
        let x = self.conv2.forward(x);

        let x = x + identity;

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
        let config = PreActBlockConfig::new(64, 64);
        assert!(!config.has_shortcut());
        assert!(config.sparsity.is_none());
        assert!(config.with_stride(2).has_shortcut());
        assert!(PreActBlockConfig::new(64, 128).has_shortcut());

        assert_eq!(
            PreActBlockConfig::new(4, 4).with_stride(3).try_validate(),
            Err("Unsupported stride: 3; expected 1 or 2".to_string())
        );
    }

    #[test]
    fn test_build_layer() {
        let layer = PreActBlockConfig::build_layer(
            3,
            64,
            128,
            2,
            ActivationConfig::Relu,
            Some(AbstractMeanSparseConfig::new()),
        );
        assert_eq!(layer.len(), 3);
        assert_eq!(
            layer
                .iter()
                .map(|b| (b.in_planes, b.out_planes, b.stride))
                .collect::<Vec<_>>(),
            vec![(64, 128, 2), (128, 128, 1), (128, 128, 1)]
        );
        assert!(layer.iter().all(|b| b.sparsity.is_some()));
    }

    #[test]
    fn test_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(4, 4)
            .with_stride(2)
            .with_sparsity(Some(AbstractMeanSparseConfig::new()))
            .init(&device);
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 4);
        assert_eq!(block.stride(), 2);
        assert!(block.has_shortcut());
        assert_eq!(block.shortcut.as_ref().map(|c| c.weight.dims()), Some([4, 4, 3, 3]));

        let mut features = Vec::new();
        block.visit_mean_sparse(&mut |layer| features.push(layer.num_features()));
        assert_eq!(features, vec![4, 4]);

        let block: PreActBlock<B> = PreActBlockConfig::new(4, 4).init(&device);
        assert!(!block.has_shortcut());
        assert_eq!(block.num_sparse_layers(), 0);
    }

    #[test]
    fn test_block_forward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(2, 4)
            .with_stride(2)
            .init(&device);

        let input: Tensor<B, 4> = Tensor::random(
            [2, 2, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        )
        .require_grad();
        let output = block.forward(input.clone());
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

        let grads = output.sum().backward();
        assert_eq!(input.grad(&grads).unwrap().dims(), [2, 2, 8, 8]);
    }

    #[test]
    fn test_identity_block_residual() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: PreActBlock<B> = PreActBlockConfig::new(3, 3).init(&device);
        let zeroed = PreActBlock {
            conv2: Conv2d {
                weight: block.conv2.weight.clone().map(|w| w.zeros_like()),
                ..block.conv2.clone()
            },
            ..block
        };

        // A zeroed final conv leaves only the identity path.
        let input: Tensor<B, 4> = Tensor::random(
            [1, 3, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        zeroed
            .forward(input.clone())
            .to_data()
            .assert_eq(&input.to_data(), true);
    }
}
