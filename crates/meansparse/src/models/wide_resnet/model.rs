//! # `WideResNet` Model
//!
//! [`WideResNetConfig`] implements [`Config`], and provides
//! [`WideResNetConfig::init`] to initialize a [`WideResNet`].
//!
//! ```text
//! x = normalize(input)
//! x = init_conv(x)                       # 3x3, 16 planes
//! x = groups(x)                          # [16w, 32w, 64w]; strides [1, 2, 2]
//! x = act(sparse_end(norm(x)))
//! x = flatten(avg_pool_8x8(x))           # [batch, 64w]
//! logits = linear(x)
//! ```

use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::mean_sparse::{AbstractMeanSparseConfig, MeanSparse};
use crate::layers::normalize::{InputNormalization, InputNormalizationConfig};
use crate::models::sparsity::{MeanSparseHost, forward_optional};
use crate::models::wide_resnet::block_group::{
    WideResNetBlockGroup, WideResNetBlockGroupConfig, WideResNetBlockGroupMeta,
};
use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::config::Config;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Module, Tensor};

/// Planes of the input convolution.
pub const WIDE_RESNET_STEM_PLANES: usize = 16;

/// Side of the final average pool window.
pub const WIDE_RESNET_POOL_SIZE: usize = 8;

/// [`WideResNet`] Config.
#[derive(Config, Debug)]
pub struct WideResNetConfig {
    /// The number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,

    /// Network depth; ``(depth - 4)`` must be a multiple of 6.
    #[config(default = 28)]
    pub depth: usize,

    /// Width multiplier.
    #[config(default = 10)]
    pub width: usize,

    /// [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// Input standardization.
    #[config(default = "InputNormalizationConfig::new()")]
    pub normalization: InputNormalizationConfig,

    /// The number of input image channels.
    #[config(default = 3)]
    pub num_input_channels: usize,

    /// [`MeanSparse`] policy; ``None`` disables sparsification.
    #[config(default = "Some(AbstractMeanSparseConfig::new())")]
    pub sparsity: Option<AbstractMeanSparseConfig>,
}

impl WideResNetConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.depth < 10 || (self.depth - 4) % 6 != 0 {
            return Err(format!(
                "Unsupported depth: {}; expected (depth - 4) % 6 == 0 and depth >= 10",
                self.depth
            ));
        }
        if self.width == 0 {
            return Err("width must be > 0".to_string());
        }
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

    /// The number of blocks in each group.
    pub fn num_blocks(&self) -> usize {
        (self.depth - 4) / 6
    }

    /// Planes ``[stem, group0, group1, group2]``.
    pub fn num_channels(&self) -> [usize; 4] {
        let w = self.width;
        [WIDE_RESNET_STEM_PLANES, 16 * w, 32 * w, 64 * w]
    }

    /// Build the block group configs.
    pub fn group_configs(&self) -> Vec<WideResNetBlockGroupConfig> {
        let channels = self.num_channels();
        [1, 2, 2]
            .into_iter()
            .enumerate()
            .map(|(g, stride)| {
                WideResNetBlockGroupConfig::build(
                    self.num_blocks(),
                    channels[g],
                    channels[g + 1],
                    stride,
                    self.activation.clone(),
                    self.sparsity.clone(),
                )
            })
            .collect()
    }

    /// Initialize a [`WideResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> WideResNet<B> {
        self.expect_valid();

        let channels = self.num_channels();
        let head_planes = channels[3];

        WideResNet {
            normalization: self.normalization.init(self.num_input_channels),
            init_conv: Conv2dConfig::new([self.num_input_channels, channels[0]], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            groups: self
                .group_configs()
                .iter()
                .map(|group| group.init(device))
                .collect(),
            norm: BatchNormConfig::new(head_planes).init(device),
            sparse_end: self
                .sparsity
                .as_ref()
                .map(|policy| policy.build_config(head_planes).init(device)),
            act: self.activation.init(device),
            pool: AvgPool2dConfig::new([WIDE_RESNET_POOL_SIZE, WIDE_RESNET_POOL_SIZE])
                .with_strides([WIDE_RESNET_POOL_SIZE, WIDE_RESNET_POOL_SIZE])
                .init(),
            logits: LinearConfig::new(head_planes, self.num_classes).init(device),
        }
    }
}

/// `WideResNet` classifier.
#[derive(Module, Debug)]
pub struct WideResNet<B: Backend> {
    /// Input standardization.
    pub normalization: InputNormalization,

    /// Input convolution.
    pub init_conv: Conv2d<B>,

    /// Block groups.
    pub groups: Vec<WideResNetBlockGroup<B>>,

    /// Head norm.
    pub norm: BatchNorm<B, 2>,

    /// Head sparsification.
    pub sparse_end: Option<MeanSparse<B>>,

    /// Head activation.
    pub act: Activation<B>,

    /// Head pool.
    pub pool: AvgPool2d,

    /// Classifier.
    pub logits: Linear<B>,
}

impl<B: Backend> MeanSparseHost<B> for WideResNet<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.groups.visit_mean_sparse(f);
        self.sparse_end.visit_mean_sparse(f);
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        let groups = self.groups.map_mean_sparse(f);
        let sparse_end = self.sparse_end.map_mean_sparse(f);
        Self {
            groups,
            sparse_end,
            ..self
        }
    }
}

impl<B: Backend> WideResNet<B> {
    /// The number of input image channels.
    pub fn num_input_channels(&self) -> usize {
        self.init_conv.weight.shape().dims[1]
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        self.logits.weight.shape().dims[1]
    }

    /// The number of pooled features.
    pub fn num_features(&self) -> usize {
        self.logits.weight.shape().dims[0]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``; after normalization
    ///   padding, the head must pool to ``1x1``.
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
        let x = self.init_conv.forward(x);
        let x = self.groups.iter().fold(x, |x, group| group.forward(x));

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

    /// The stride of the block groups, from input to head.
    pub fn stride(&self) -> usize {
        self.groups
            .iter()
            .fold(1, |acc, group| acc * group.stride())
    }
}
