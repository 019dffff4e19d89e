//! # Architecture Selection
//!
//! [`ClassifierConfig`] selects one of the model families, and
//! [`Classifier`] wraps the initialized model.
//!
//! [`ClassifierConfig::from_architecture`] applies the shared
//! ``(depth, width, num_classes)`` constructor rules:
//! * `WideResNet` requires ``(depth - 4) % 6 == 0``, and any ``width > 0``;
//! * `PreActResNet` requires ``depth`` in ``{18, 34}``, and ``width == 0``.

use crate::layers::mean_sparse::MeanSparse;
use crate::models::preact_resnet::model::{PreActResNet, PreActResNetConfig};
use crate::models::sparsity::MeanSparseHost;
use crate::models::wide_resnet::model::{WideResNet, WideResNetConfig};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A model which maps ``[batch, channels, height, width]`` images to
/// ``[batch, num_classes]`` logits.
pub trait ImageClassifier<B: Backend>: MeanSparseHost<B> + Module<B> {
    /// Compute the logits.
    fn logits(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2>;
}

impl<B: Backend> ImageClassifier<B> for WideResNet<B> {
    fn logits(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.forward(input)
    }
}

impl<B: Backend> ImageClassifier<B> for PreActResNet<B> {
    fn logits(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.forward(input)
    }
}

/// Model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// [`WideResNet`].
    WideResNet,

    /// [`PreActResNet`].
    PreActResNet,
}

impl Display for Architecture {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Architecture::WideResNet => write!(f, "wide_resnet"),
            Architecture::PreActResNet => write!(f, "preact_resnet"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wide_resnet" | "wideresnet" | "wrn" => Ok(Architecture::WideResNet),
            "preact_resnet" | "preactresnet" | "preact" => Ok(Architecture::PreActResNet),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}

/// [`Classifier`] Config.
#[derive(Config, Debug)]
pub enum ClassifierConfig {
    /// [`WideResNet`] config.
    WideResNet(WideResNetConfig),

    /// [`PreActResNet`] config.
    PreActResNet(PreActResNetConfig),
}

impl From<WideResNetConfig> for ClassifierConfig {
    fn from(config: WideResNetConfig) -> Self {
        Self::WideResNet(config)
    }
}

impl From<PreActResNetConfig> for ClassifierConfig {
    fn from(config: PreActResNetConfig) -> Self {
        Self::PreActResNet(config)
    }
}

impl ClassifierConfig {
    /// Build a config from the shared constructor arguments.
    ///
    /// The result is validated.
    pub fn from_architecture(
        architecture: Architecture,
        depth: usize,
        width: usize,
        num_classes: usize,
    ) -> Result<Self, String> {
        let config: Self = match architecture {
            Architecture::WideResNet => WideResNetConfig::new()
                .with_depth(depth)
                .with_width(width)
                .with_num_classes(num_classes)
                .into(),
            Architecture::PreActResNet => {
                if width != 0 {
                    return Err(format!(
                        "Unsupported width: {width}; PreActResNet requires width 0"
                    ));
                }
                PreActResNetConfig::new()
                    .with_depth(depth)
                    .with_num_classes(num_classes)
                    .into()
            }
        };
        config.try_validate()?;
        Ok(config)
    }

    /// The model family.
    pub fn architecture(&self) -> Architecture {
        match self {
            ClassifierConfig::WideResNet(_) => Architecture::WideResNet,
            ClassifierConfig::PreActResNet(_) => Architecture::PreActResNet,
        }
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        match self {
            ClassifierConfig::WideResNet(config) => config.num_classes,
            ClassifierConfig::PreActResNet(config) => config.num_classes,
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        match self {
            ClassifierConfig::WideResNet(config) => config.try_validate(),
            ClassifierConfig::PreActResNet(config) => config.try_validate(),
        }
    }

    /// Initialize a [`Classifier`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Classifier<B> {
        match self {
            ClassifierConfig::WideResNet(config) => Classifier::WideResNet(config.init(device)),
            ClassifierConfig::PreActResNet(config) => {
                Classifier::PreActResNet(config.init(device))
            }
        }
    }
}

/// A model from one of the supported families.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Classifier<B: Backend> {
    /// [`WideResNet`] model.
    WideResNet(WideResNet<B>),

    /// [`PreActResNet`] model.
    PreActResNet(PreActResNet<B>),
}

impl<B: Backend> Classifier<B> {
    /// The model family.
    pub fn architecture(&self) -> Architecture {
        match self {
            Classifier::WideResNet(_) => Architecture::WideResNet,
            Classifier::PreActResNet(_) => Architecture::PreActResNet,
        }
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        match self {
            Classifier::WideResNet(model) => model.num_classes(),
            Classifier::PreActResNet(model) => model.num_classes(),
        }
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
        match self {
            Classifier::WideResNet(model) => model.forward(input),
            Classifier::PreActResNet(model) => model.forward(input),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for Classifier<B> {
    fn logits(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.forward(input)
    }
}

impl<B: Backend> MeanSparseHost<B> for Classifier<B> {
    fn visit_mean_sparse<F>(
        &self,
        f: &mut F,
    ) where
        F: FnMut(&MeanSparse<B>),
    {
        match self {
            Classifier::WideResNet(model) => model.visit_mean_sparse(f),
            Classifier::PreActResNet(model) => model.visit_mean_sparse(f),
        }
    }

    fn map_mean_sparse<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(MeanSparse<B>) -> MeanSparse<B>,
    {
        match self {
            Classifier::WideResNet(model) => Classifier::WideResNet(model.map_mean_sparse(f)),
            Classifier::PreActResNet(model) => {
                Classifier::PreActResNet(model.map_mean_sparse(f))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    #[test]
    fn test_architecture_parse() {
        assert_eq!("wrn".parse::<Architecture>(), Ok(Architecture::WideResNet));
        assert_eq!(
            "PreAct_ResNet".parse::<Architecture>(),
            Ok(Architecture::PreActResNet)
        );
        assert_eq!(
            "vit".parse::<Architecture>(),
            Err("Unknown architecture: vit".to_string())
        );
        assert_eq!(Architecture::WideResNet.to_string(), "wide_resnet");
    }

    #[test]
    fn test_from_architecture() {
        let config = ClassifierConfig::from_architecture(Architecture::WideResNet, 70, 16, 10)
            .unwrap();
        assert_eq!(config.architecture(), Architecture::WideResNet);
        assert_eq!(config.num_classes(), 10);
        match &config {
            ClassifierConfig::WideResNet(c) => {
                assert_eq!((c.depth, c.width), (70, 16));
                assert!(c.sparsity.is_some());
            }
            _ => panic!("expected WideResNet"),
        }

        assert_that!(
            ClassifierConfig::from_architecture(Architecture::WideResNet, 30, 10, 10).err(),
            eq(Some(
                "Unsupported depth: 30; expected (depth - 4) % 6 == 0 and depth >= 10"
                    .to_string()
            ))
        );

        let config =
            ClassifierConfig::from_architecture(Architecture::PreActResNet, 18, 0, 100).unwrap();
        assert_eq!(config.architecture(), Architecture::PreActResNet);
        assert_eq!(config.num_classes(), 100);

        assert_eq!(
            ClassifierConfig::from_architecture(Architecture::PreActResNet, 18, 10, 10).err(),
            Some("Unsupported width: 10; PreActResNet requires width 0".to_string())
        );
        assert_eq!(
            ClassifierConfig::from_architecture(Architecture::PreActResNet, 50, 0, 10).err(),
            Some("Unsupported depth: 50; expected 18 or 34".to_string())
        );
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config: ClassifierConfig = WideResNetConfig::new().with_depth(16).into();
        let json = config.to_string();
        let loaded = ClassifierConfig::load_binary(json.as_bytes()).unwrap();
        assert_eq!(loaded.architecture(), Architecture::WideResNet);
        match loaded {
            ClassifierConfig::WideResNet(c) => assert_eq!(c.depth, 16),
            _ => panic!("expected WideResNet"),
        }
    }

    #[test]
    fn test_classifier_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: Classifier<B> = ClassifierConfig::from(
            WideResNetConfig::new()
                .with_depth(10)
                .with_width(1)
                .with_num_classes(5),
        )
        .init(&device);
        assert_eq!(model.architecture(), Architecture::WideResNet);
        assert_eq!(model.num_classes(), 5);
        assert_eq!(model.num_sparse_layers(), 10);

        let model = model.with_threshold(0.5);
        assert_eq!(model.thresholds(), vec![0.5; 10]);

        let logits = model.logits(Tensor::zeros([3, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [3, 5]);
    }
}
