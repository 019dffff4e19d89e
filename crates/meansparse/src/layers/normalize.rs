//! # Input Standardization
//!
//! [`InputNormalization`] optionally zero-pads the input image, and then
//! standardizes each channel: ``(x - mean[c]) / std[c]``.
//!
//! The channel statistics are configuration, not state; they are not
//! written to module records.

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::prelude::{Backend, Tensor};

/// CIFAR-10 channel means.
pub const CIFAR10_MEAN: [f64; 3] = [0.4914, 0.4822, 0.4465];

/// CIFAR-10 channel standard deviations.
pub const CIFAR10_STD: [f64; 3] = [0.2471, 0.2435, 0.2616];

/// CIFAR-100 channel means.
pub const CIFAR100_MEAN: [f64; 3] = [0.5071, 0.4865, 0.4409];

/// CIFAR-100 channel standard deviations.
pub const CIFAR100_STD: [f64; 3] = [0.2673, 0.2564, 0.2762];

/// [`InputNormalization`] Config.
#[derive(Config, Debug)]
pub struct InputNormalizationConfig {
    /// Channel means; a single value applies to every channel.
    #[config(default = "CIFAR10_MEAN.to_vec()")]
    pub mean: Vec<f64>,

    /// Channel standard deviations; a single value applies to every channel.
    #[config(default = "CIFAR10_STD.to_vec()")]
    pub std: Vec<f64>,

    /// Zero padding added to every image border before standardization.
    #[config(default = 0)]
    pub padding: usize,
}

impl Default for InputNormalizationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl InputNormalizationConfig {
    /// CIFAR-10 statistics.
    pub fn cifar10() -> Self {
        Self::new()
    }

    /// CIFAR-100 statistics.
    pub fn cifar100() -> Self {
        Self::new()
            .with_mean(CIFAR100_MEAN.to_vec())
            .with_std(CIFAR100_STD.to_vec())
    }

    /// Check the config against the number of input channels.
    pub fn try_validate(
        &self,
        num_channels: usize,
    ) -> Result<(), String> {
        for (name, values) in [("mean", &self.mean), ("std", &self.std)] {
            if values.len() != 1 && values.len() != num_channels {
                return Err(format!(
                    "{name} has {} values; expected 1 or {num_channels}",
                    values.len()
                ));
            }
        }
        if let Some(s) = self.std.iter().find(|s| !(**s > 0.0)) {
            return Err(format!("std values must be > 0: {s}"));
        }
        Ok(())
    }

    /// Initialize an [`InputNormalization`] for `num_channels` channels.
    ///
    /// # Panics
    ///
    /// If the config is invalid for `num_channels`.
    pub fn init(
        &self,
        num_channels: usize,
    ) -> InputNormalization {
        if let Err(err) = self.try_validate(num_channels) {
            panic!("{}", err);
        }
        let broadcast = |values: &Vec<f64>| {
            if values.len() == 1 {
                vec![values[0]; num_channels]
            } else {
                values.clone()
            }
        };
        InputNormalization {
            mean: Ignored(broadcast(&self.mean)),
            std: Ignored(broadcast(&self.std)),
            padding: self.padding,
        }
    }
}

/// Input padding and per-channel standardization.
#[derive(Module, Clone, Debug)]
pub struct InputNormalization {
    /// Channel means.
    pub mean: Ignored<Vec<f64>>,

    /// Channel standard deviations.
    pub std: Ignored<Vec<f64>>,

    /// Border padding.
    pub padding: usize,
}

impl InputNormalization {
    /// The number of channels.
    pub fn num_channels(&self) -> usize {
        self.mean.0.len()
    }

    /// Output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        input_resolution.map(|r| r + 2 * self.padding)
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height + 2*padding, width + 2*padding]``
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", self.num_channels())],
        );
        let channels = self.num_channels();
        let device = input.device();

        let x = if self.padding > 0 {
            let p = self.padding;
            input.pad((p, p, p, p), 0.0)
        } else {
            input
        };

        let mean = Tensor::<B, 1>::from_floats(self.mean.0.as_slice(), &device)
            .reshape([1, channels, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(self.std.0.as_slice(), &device)
            .reshape([1, channels, 1, 1]);

        (x - mean) / std
    }
}
