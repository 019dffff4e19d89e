//! # Model Info Records
//!
//! Benchmark results are stored as one JSON file per model:
//!
//! ```text
//! <root>/<dataset>/<threat_model>/<model_name>.json
//! ```
//!
//! Accuracies are stored in percent, as numbers or numeric strings; the
//! robust accuracy field is ``autoattack_acc`` for the ``Linf`` and ``L2``
//! threat models, and ``corruptions_acc`` for ``corruptions``.

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Benchmark dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenchmarkDataset {
    /// CIFAR-10.
    #[serde(rename = "cifar10")]
    Cifar10,

    /// CIFAR-100.
    #[serde(rename = "cifar100")]
    Cifar100,

    /// ImageNet.
    #[serde(rename = "imagenet")]
    ImageNet,
}

impl BenchmarkDataset {
    /// All datasets.
    pub const ALL: [BenchmarkDataset; 3] = [
        BenchmarkDataset::Cifar10,
        BenchmarkDataset::Cifar100,
        BenchmarkDataset::ImageNet,
    ];

    /// The record directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkDataset::Cifar10 => "cifar10",
            BenchmarkDataset::Cifar100 => "cifar100",
            BenchmarkDataset::ImageNet => "imagenet",
        }
    }

    /// The number of classes.
    pub fn num_classes(&self) -> usize {
        match self {
            BenchmarkDataset::Cifar10 => 10,
            BenchmarkDataset::Cifar100 => 100,
            BenchmarkDataset::ImageNet => 1000,
        }
    }
}

impl Display for BenchmarkDataset {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BenchmarkDataset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown dataset: {s}"))
    }
}

/// Benchmark threat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatModel {
    /// L-infinity bounded perturbations.
    Linf,

    /// L2 bounded perturbations.
    L2,

    /// Common corruptions.
    #[serde(rename = "corruptions")]
    Corruptions,
}

impl ThreatModel {
    /// All threat models.
    pub const ALL: [ThreatModel; 3] = [ThreatModel::Linf, ThreatModel::L2, ThreatModel::Corruptions];

    /// The record directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatModel::Linf => "Linf",
            ThreatModel::L2 => "L2",
            ThreatModel::Corruptions => "corruptions",
        }
    }

    /// The record field holding the robust accuracy.
    pub fn acc_field(&self) -> &'static str {
        match self {
            ThreatModel::Linf | ThreatModel::L2 => "autoattack_acc",
            ThreatModel::Corruptions => "corruptions_acc",
        }
    }
}

impl Display for ThreatModel {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown threat model: {s}"))
    }
}

/// A number, or a string holding one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    /// A JSON number.
    Number(f64),

    /// A JSON string.
    Text(String),
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Number(value)
    }
}

impl Numeric {
    /// Read the value.
    pub fn as_f64(&self) -> anyhow::Result<f64> {
        match self {
            Numeric::Number(value) => Ok(*value),
            Numeric::Text(text) => text
                .trim()
                .parse::<f64>()
                .with_context(|| format!("not a number: {text:?}")),
        }
    }
}

/// A model info record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Paper link.
    pub link: Option<String>,

    /// Paper title.
    pub name: Option<String>,

    /// Paper authors.
    pub authors: Option<String>,

    /// Was extra training data used?
    pub additional_data: Option<bool>,

    /// Forward passes per prediction.
    pub number_forward_passes: Option<u32>,

    /// Dataset name.
    pub dataset: Option<String>,

    /// Publication venue.
    pub venue: Option<String>,

    /// Architecture description.
    pub architecture: Option<String>,

    /// Perturbation budget.
    pub eps: Option<Numeric>,

    /// Clean accuracy, in percent.
    pub clean_acc: Option<Numeric>,

    /// Reported robust accuracy, in percent.
    pub reported: Option<Numeric>,

    /// `AutoAttack` robust accuracy, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoattack_acc: Option<Numeric>,

    /// Corruption robust accuracy, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corruptions_acc: Option<Numeric>,

    /// Fields not modeled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelInfo {
    /// The robust accuracy field for `threat_model`.
    pub fn robust_acc(
        &self,
        threat_model: ThreatModel,
    ) -> Option<&Numeric> {
        match threat_model {
            ThreatModel::Linf | ThreatModel::L2 => self.autoattack_acc.as_ref(),
            ThreatModel::Corruptions => self.corruptions_acc.as_ref(),
        }
    }
}

/// The path of a model info record.
pub fn model_info_path(
    root: &Path,
    dataset: BenchmarkDataset,
    threat_model: ThreatModel,
    model_name: &str,
) -> PathBuf {
    root.join(dataset.as_str())
        .join(threat_model.as_str())
        .join(format!("{model_name}.json"))
}

/// Write a fresh model info record.
///
/// Every descriptive field is written as ``null``.
///
/// # Arguments
///
/// - `clean_acc`: clean accuracy, in percent.
/// - `robust_acc`: robust accuracy, in percent.
///
/// # Returns
///
/// The record path.
pub fn update_model_info(
    root: &Path,
    dataset: BenchmarkDataset,
    threat_model: ThreatModel,
    model_name: &str,
    clean_acc: f64,
    robust_acc: f64,
    eps: Option<f64>,
) -> anyhow::Result<PathBuf> {
    let path = model_info_path(root, dataset, threat_model, model_name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut info = ModelInfo {
        dataset: Some(dataset.as_str().to_string()),
        eps: eps.map(Numeric::from),
        clean_acc: Some(clean_acc.into()),
        ..Default::default()
    };
    match threat_model {
        ThreatModel::Linf | ThreatModel::L2 => info.autoattack_acc = Some(robust_acc.into()),
        ThreatModel::Corruptions => info.corruptions_acc = Some(robust_acc.into()),
    }

    let json = serde_json::to_string_pretty(&info)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;

    tracing::info!(path = %path.display(), "updated model info");
    Ok(path)
}

/// A normalized leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfoEntry {
    /// Record file stem.
    pub model_name: String,

    /// Clean accuracy, as a fraction.
    pub clean_acc: f64,

    /// Robust accuracy, as a fraction.
    pub robust_acc: f64,

    /// The record; ``venue`` is ``"Unpublished"`` when it was empty.
    pub info: ModelInfo,
}

/// Read a single record, and normalize it.
pub fn read_model_info(
    path: &Path,
    threat_model: ThreatModel,
) -> anyhow::Result<ModelInfoEntry> {
    let model_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("bad record name: {}", path.display()))?
        .to_string();

    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut info: ModelInfo =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let clean_acc = match &info.clean_acc {
        Some(acc) => acc.as_f64()? / 100.0,
        None => bail!("{}: missing clean_acc", path.display()),
    };
    let robust_acc = match info.robust_acc(threat_model) {
        Some(acc) => acc.as_f64()? / 100.0,
        None => bail!("{}: missing {}", path.display(), threat_model.acc_field()),
    };

    if info.venue.as_deref().is_none_or(str::is_empty) {
        info.venue = Some("Unpublished".to_string());
    }

    Ok(ModelInfoEntry {
        model_name,
        clean_acc,
        robust_acc,
        info,
    })
}

/// Read every record for a dataset and threat model.
///
/// # Returns
///
/// Entries sorted by robust accuracy, descending; ties by name.
/// A missing directory yields no entries.
pub fn list_model_infos(
    root: &Path,
    dataset: BenchmarkDataset,
    threat_model: ThreatModel,
) -> anyhow::Result<Vec<ModelInfoEntry>> {
    let dir = root.join(dataset.as_str()).join(threat_model.as_str());
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "no model info directory");
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = dir_entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        entries.push(read_model_info(&path, threat_model)?);
    }

    entries.sort_by(|a, b| {
        b.robust_acc
            .total_cmp(&a.robust_acc)
            .then_with(|| a.model_name.cmp(&b.model_name))
    });
    Ok(entries)
}

/// Render entries as a markdown leaderboard table.
pub fn render_leaderboard(entries: &[ModelInfoEntry]) -> String {
    let mut lines = vec![
        "| # | Model ID | Paper | Clean accuracy | Robust accuracy | Architecture | Venue |"
            .to_string(),
        "|:---:|---|---|:---:|:---:|:---:|:---:|".to_string(),
    ];

    for (idx, entry) in entries.iter().enumerate() {
        let info = &entry.info;
        let name = info.name.as_deref().unwrap_or("");
        let paper = match info.link.as_deref() {
            Some(link) if !link.is_empty() => format!("*[{name}]({link})*"),
            _ => format!("*{name}*"),
        };
        lines.push(format!(
            "| <sub>**{}**</sub> | <sub>**{}**</sub> | <sub>{}</sub> | <sub>{:.2}%</sub> | <sub>{:.2}%</sub> | <sub>{}</sub> | <sub>{}</sub> |",
            idx + 1,
            entry.model_name,
            paper,
            entry.clean_acc * 100.0,
            entry.robust_acc * 100.0,
            info.architecture.as_deref().unwrap_or(""),
            info.venue.as_deref().unwrap_or(""),
        ));
    }

    let mut table = lines.join("\n");
    table.push('\n');
    table
}
