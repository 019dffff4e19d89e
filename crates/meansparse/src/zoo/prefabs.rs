//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named, described builder for a [`ClassifierConfig`].
//! [`CLASSIFIER_PREFABS`] lists the known prefabs, and
//! [`lookup_prefab`] finds one by name.

use crate::layers::activation::ActivationConfig;
use crate::layers::normalize::InputNormalizationConfig;
use crate::models::classifier::ClassifierConfig;
use crate::models::preact_resnet::model::PreActResNetConfig;
use crate::models::wide_resnet::model::WideResNetConfig;
use anyhow::anyhow;
use burn::config::Config;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`].
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Name of the prefab.
    pub name: &'static str,

    /// Description of the prefab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        let builder = self.builder;
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(builder),
        }
    }

    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`Config`] Well-Known Pre-Fab.
#[derive(Clone)]
pub struct PreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Name of the prefab.
    pub name: String,

    /// Description of the prefab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{type_name}>"));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle.field("config", &self.new_config());
        }

        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + Config + Debug,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }
}

/// Static builder for a [`ClassifierConfig`] prefab.
pub type StaticClassifierPreFab = StaticPreFabConfig<ClassifierConfig>;

/// A [`ClassifierConfig`] prefab.
pub type ClassifierPreFab = PreFabConfig<ClassifierConfig>;

/// WideResNet-70-16, Swish, CIFAR-10.
pub static MEANSPARSE_WRN_70_16_CIFAR10: StaticClassifierPreFab = StaticPreFabConfig {
    name: "meansparse_wrn_70_16",
    description: "MeanSparse WideResNet-70-16 (Swish) for CIFAR-10",
    builder: || {
        WideResNetConfig::new()
            .with_depth(70)
            .with_width(16)
            .with_activation(ActivationConfig::Swish)
            .into()
    },
};

/// WideResNet-70-16, Swish, CIFAR-100.
pub static MEANSPARSE_WRN_70_16_CIFAR100: StaticClassifierPreFab = StaticPreFabConfig {
    name: "meansparse_wrn_70_16_cifar100",
    description: "MeanSparse WideResNet-70-16 (Swish) for CIFAR-100",
    builder: || {
        WideResNetConfig::new()
            .with_depth(70)
            .with_width(16)
            .with_num_classes(100)
            .with_activation(ActivationConfig::Swish)
            .with_normalization(InputNormalizationConfig::cifar100())
            .into()
    },
};

/// WideResNet-28-10, CIFAR-10.
pub static MEANSPARSE_WRN_28_10_CIFAR10: StaticClassifierPreFab = StaticPreFabConfig {
    name: "meansparse_wrn_28_10",
    description: "MeanSparse WideResNet-28-10 for CIFAR-10",
    builder: || WideResNetConfig::new().into(),
};

/// WideResNet-34-10, CIFAR-10.
pub static MEANSPARSE_WRN_34_10_CIFAR10: StaticClassifierPreFab = StaticPreFabConfig {
    name: "meansparse_wrn_34_10",
    description: "MeanSparse WideResNet-34-10 for CIFAR-10",
    builder: || WideResNetConfig::new().with_depth(34).into(),
};

/// PreActResNet-18, CIFAR-10.
pub static PREACT_RESNET18_CIFAR10: StaticClassifierPreFab = StaticPreFabConfig {
    name: "preact_resnet18",
    description: "Pre-Activation ResNet-18 for CIFAR-10",
    builder: || PreActResNetConfig::preact_resnet18(10).into(),
};

/// All known prefabs.
pub static CLASSIFIER_PREFABS: &[&StaticClassifierPreFab] = &[
    &MEANSPARSE_WRN_70_16_CIFAR10,
    &MEANSPARSE_WRN_70_16_CIFAR100,
    &MEANSPARSE_WRN_28_10_CIFAR10,
    &MEANSPARSE_WRN_34_10_CIFAR10,
    &PREACT_RESNET18_CIFAR10,
];

/// Find a prefab by name.
pub fn lookup_prefab(name: &str) -> anyhow::Result<ClassifierPreFab> {
    CLASSIFIER_PREFABS
        .iter()
        .find(|prefab| prefab.name == name)
        .map(|prefab| prefab.to_prefab())
        .ok_or_else(|| {
            let known = CLASSIFIER_PREFABS
                .iter()
                .map(|prefab| prefab.name)
                .collect::<Vec<_>>()
                .join(", ");
            anyhow!("Unknown prefab: {name}; known prefabs: [{known}]")
        })
}
