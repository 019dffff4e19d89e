//! # Pre-Activation `ResNet` Model
//!
//! [`PreActResNetConfig`] implements [`Config`], and provides
//! [`PreActResNetConfig::init`] to initialize a [`PreActResNet`].

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::mean_sparse::{AbstractMeanSparseConfig, MeanSparse};
use crate::layers::normalize::{InputNormalization, InputNormalizationConfig};
use crate::models::preact_resnet::block::{PreActBlock, PreActBlockConfig};
use crate::models::sparsity::{MeanSparseHost, forward_optional};
use crate::models::util::try_validate_chain;
use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::config::Config;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Module, Tensor};

/// PreActResNet-18 block depths.
pub const PREACT_RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// PreActResNet-34 block depths.
pub const PREACT_RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Layer ``(in_planes, out_planes, stride)`` triples.
pub const PREACT_RESNET_LAYERS: [(usize, usize, usize); 4] =
    [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, 512, 2)];

/// Side of the final average pool window.
pub const PREACT_RESNET_POOL_SIZE: usize = 4;

/// Block depths for a supported network depth.
pub fn preact_resnet_blocks(depth: usize) -> Result<[usize; 4], String> {
    match depth {
        18 => Ok(PREACT_RESNET18_BLOCKS),
        34 => Ok(PREACT_RESNET34_BLOCKS),
        _ => Err(format!("Unsupported depth: {depth}; expected 18 or 34")),
    }
}

/// [`PreActResNet`] Config.
#[derive(Config, Debug)]
pub struct PreActResNetConfig {
    /// The number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,

    /// Network depth; 18 or 34.
    #[config(default = 18)]
    pub depth: usize,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// Input standardization.
    #[config(default = "InputNormalizationConfig::new()")]
    pub normalization: InputNormalizationConfig,

    /// The number of input image channels.
    #[config(default = 3)]
    pub num_input_channels: usize,

    /// [`MeanSparse`] policy; ``None`` (the default) disables sparsification.
    #[config(default = "None")]
    pub sparsity: Option<AbstractMeanSparseConfig>,
}

impl PreActResNetConfig {
    /// Create a PreActResNet-18 config.
    pub fn preact_resnet18(num_classes: usize) -> Self {
        Self::new().with_num_classes(num_classes)
    }

    /// Create a PreActResNet-34 config.
    pub fn preact_resnet34(num_classes: usize) -> Self {
        Self::new().with_depth(34).with_num_classes(num_classes)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        preact_resnet_blocks(self.depth)?;
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        self.normalization
            .try_validate(self.num_input_channels)
            .map_err(|err| format!("normalization: {err}"))
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Build the block configs of each layer.
    ///
    /// # Panics
    ///
    /// If the depth is unsupported.
    pub fn layer_configs(&self) -> Vec<Vec<PreActBlockConfig>> {
        let blocks = match preact_resnet_blocks(self.depth) {
            Ok(blocks) => blocks,
            Err(err) => panic!("{}", err),
        };
        PREACT_RESNET_LAYERS
            .iter()
            .zip(blocks)
            .map(|(&(in_planes, out_planes, stride), num_blocks)| {
                PreActBlockConfig::build_layer(
                    num_blocks,
                    in_planes,
                    out_planes,
                    stride,
                    self.activation.clone(),
                    self.sparsity.clone(),
                )
            })
            .collect()
    }

    /// Initialize a [`PreActResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PreActResNet<B> {
        self.expect_valid();

        let layers = self.layer_configs();
        if let Err(err) = try_validate_chain(
            layers
                .iter()
                .flatten()
                .map(|block| (block.in_planes, block.out_planes)),
        ) {
            panic!("{}", err);
        }

        let stem_planes = PREACT_RESNET_LAYERS[0].0;
        let head_planes = PREACT_RESNET_LAYERS[3].1;

        PreActResNet {
            normalization: self.normalization.init(self.num_input_channels),
            stem: Conv2dConfig::new([self.num_input_channels, stem_planes], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            layers: layers
                .iter()
                .map(|layer| layer.iter().map(|block| block.init(device)).collect())
                .collect(),
            norm: BatchNormConfig::new(head_planes).init(device),
            sparse_end: self
                .sparsity
                .as_ref()
                .map(|policy| policy.build_config(head_planes).init(device)),
            act: self.activation.init(device),
            pool: AvgPool2dConfig::new([PREACT_RESNET_POOL_SIZE, PREACT_RESNET_POOL_SIZE])
                .with_strides([PREACT_RESNET_POOL_SIZE, PREACT_RESNET_POOL_SIZE])
                .init(),
            logits: LinearConfig::new(head_planes, self.num_classes).init(device),
        }
    }
}

/// Pre-activation `ResNet` classifier.
#[derive(Module, Debug)]
pub struct PreActResNet<B: Backend> {
    /// Input standardization.
    pub normalization: InputNormalization,

    /// Stem convolution.
    pub stem: Conv2d<B>,

    /// Residual layers.
    pub layers: Vec<Vec<PreActBlock<B>>>,

    /// Head norm.
    pub norm: BatchNorm<B, 2>,

    /// Optional head sparsification.
    pub sparse_end: Option<MeanSparse<B>>,

    /// Head activation.
    pub act: Activation<B>,

    /// Head pool.
    pub pool: AvgPool2d,

    /// Classifier.
    pub logits: Linear<B>,
}

impl<B: Backend> MeanSparseHost<B> for PreActResNet<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.layers.visit_mean_sparse(f);
        self.sparse_end.visit_mean_sparse(f);
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        let layers = self.layers.map_mean_sparse(f);
        let sparse_end = self.sparse_end.map_mean_sparse(f);
        Self {
            layers,
            sparse_end,
            ..self
        }
    }
}

impl<B: Backend> PreActResNet<B> {
    /// The number of input image channels.
    pub fn num_input_channels(&self) -> usize {
        self.stem.weight.shape().dims[1]
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        self.logits.weight.shape().dims[1]
    }

    /// The number of pooled features.
    pub fn num_features(&self) -> usize {
        self.logits.weight.shape().dims[0]
    }

    /// The number of residual blocks in each layer.
    pub fn num_blocks(&self) -> Vec<usize> {
        self.layers.iter().map(|layer| layer.len()).collect()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", self.num_input_channels())],
        );

        let x = self.normalization.forward(input);
        let x = self.stem.forward(x);
        let x = self
            .layers
            .iter()
            .flatten()
            .fold(x, |x, block| block.forward(x));

        let x = self.norm.forward(x);
        let x = forward_optional(&self.sparse_end, x);
        let x = self.act.forward(x);

        let x = self.pool.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);
        assert_shape_contract!(
            ["batch", "features"],
            &x,
            &[("batch", batch), ("features", self.num_features())],
        );

        self.logits.forward(x)
    }
}
