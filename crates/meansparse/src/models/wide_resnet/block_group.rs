//! # `WideResNet` Block Group
//!
//! A [`WideResNetBlockGroup`] is a sequence of [`WideResNetBlock`]s;
//! the first block changes planes and resolution, the rest preserve them.

use crate::layers::activation::ActivationConfig;
use crate::layers::mean_sparse::{AbstractMeanSparseConfig, MeanSparse};
use crate::models::sparsity::MeanSparseHost;
use crate::models::util::{strided_output_resolution, try_validate_chain};
use crate::models::wide_resnet::block::{
    WideResNetBlock, WideResNetBlockConfig, WideResNetBlockMeta,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`WideResNetBlockGroup`] Meta API.
pub trait WideResNetBlockGroupMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the group is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The effective stride of the group.
    fn stride(&self) -> usize;

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

/// [`WideResNetBlockGroup`] Configuration.
#[derive(Config, Debug)]
pub struct WideResNetBlockGroupConfig {
    /// The component blocks.
    pub blocks: Vec<WideResNetBlockConfig>,
}

impl From<Vec<WideResNetBlockConfig>> for WideResNetBlockGroupConfig {
    fn from(blocks: Vec<WideResNetBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl WideResNetBlockGroupMeta for WideResNetBlockGroupConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl WideResNetBlockGroupConfig {
    /// Build a group of `num_blocks` blocks.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        stride: usize,
        activation: ActivationConfig,
        sparsity: Option<AbstractMeanSparseConfig>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                let config = if b == 0 {
                    WideResNetBlockConfig::new(in_planes, out_planes).with_stride(stride)
                } else {
                    WideResNetBlockConfig::new(out_planes, out_planes)
                };
                config
                    .with_activation(activation.clone())
                    .with_sparsity(sparsity.clone())
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        try_validate_chain(
            self.blocks
                .iter()
                .map(|block| (block.in_planes(), block.out_planes())),
        )?;
        for (idx, block) in self.blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| format!("block[{idx}]: {err}"))?;
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a new [`WideResNetBlockGroup`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> WideResNetBlockGroup<B> {
        self.expect_valid();

        WideResNetBlockGroup {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// `WideResNet` block group.
#[derive(Module, Debug)]
pub struct WideResNetBlockGroup<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<WideResNetBlock<B>>,
}

impl<B: Backend> WideResNetBlockGroupMeta for WideResNetBlockGroup<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> MeanSparseHost<B> for WideResNetBlockGroup<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        self.blocks.visit_mean_sparse(f);
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        Self {
            blocks: self.blocks.map_mean_sparse(f),
        }
    }
}

impl<B: Backend> WideResNetBlockGroup<B> {
    /// Apply the block group.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

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
