#![recursion_limit = "256"]

mod data;

use anyhow::Context;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::CompactRecorder;
use clap::{Parser, Subcommand, arg};
use meansparse::calibrate::calibrate_statistics;
use meansparse::eval::clean_accuracy;
use meansparse::io::pytorch::load_pytorch_weights;
use meansparse::models::classifier::{Classifier, ClassifierConfig};
use meansparse::models::sparsity::MeanSparseHost;
use meansparse::zoo::model_info::{
    BenchmarkDataset, ThreatModel, list_model_infos, render_leaderboard, update_model_info,
};
use meansparse::zoo::prefabs::{CLASSIFIER_PREFABS, lookup_prefab};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cuda")]
type DefaultBackend = burn::backend::Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
type DefaultBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
type DefaultBackend = burn::backend::NdArray;

const CONFIG_FILE: &str = "config.json";
const MODEL_FILE: &str = "model";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the model prefabs.
    List,

    /// Print a prefab config, and model statistics.
    Inspect {
        /// Prefab name.
        #[arg(long)]
        prefab: String,

        /// Initialize the model, and count parameters.
        #[arg(long, default_value_t = false)]
        init: bool,
    },

    /// Calibrate `MeanSparse` statistics, and save the model.
    Calibrate {
        /// Prefab name.
        #[arg(long)]
        prefab: String,

        /// PyTorch checkpoint to import.
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Image folder: ``<root>/<class>/<image>``.
        #[arg(long)]
        data: PathBuf,

        /// Calibration batch size.
        #[arg(long, default_value_t = 128)]
        batch_size: usize,

        /// Limit on the number of calibration images.
        #[arg(long)]
        num_images: Option<usize>,

        /// Seed for the image subset and order.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Threshold to store after calibration.
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,

        /// Output directory.
        #[arg(long)]
        out: PathBuf,
    },

    /// Measure clean accuracy of a saved model.
    Eval {
        /// Directory written by `calibrate`.
        #[arg(long)]
        model_dir: PathBuf,

        /// Image folder: ``<root>/<class>/<image>``.
        #[arg(long)]
        data: PathBuf,

        /// Evaluation batch size.
        #[arg(long, default_value_t = 500)]
        batch_size: usize,

        /// Limit on the number of evaluation images.
        #[arg(long)]
        num_images: Option<usize>,

        /// Seed for the image subset.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Threshold override.
        #[arg(long)]
        threshold: Option<f64>,

        /// Write a model info record under this root.
        #[arg(long)]
        info_root: Option<PathBuf>,

        /// Model name for the model info record.
        #[arg(long, default_value = "model")]
        model_name: String,

        /// Dataset of the model info record.
        #[arg(long, default_value = "cifar10")]
        dataset: String,

        /// Threat model of the model info record.
        #[arg(long, default_value = "Linf")]
        threat_model: String,

        /// Robust accuracy, in percent, measured elsewhere.
        #[arg(long)]
        robust_acc: Option<f64>,

        /// Perturbation budget.
        #[arg(long)]
        eps: Option<f64>,
    },

    /// Render a leaderboard from model info records.
    Leaderboard {
        /// Model info root.
        #[arg(long, default_value = "model_info")]
        root: PathBuf,

        /// Dataset.
        #[arg(long, default_value = "cifar10")]
        dataset: String,

        /// Threat model.
        #[arg(long, default_value = "Linf")]
        threat_model: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    let device = Default::default();

    match args.command {
        Command::List => {
            for prefab in CLASSIFIER_PREFABS {
                println!("{:<32} {}", prefab.name, prefab.description);
            }
            Ok(())
        }
        Command::Inspect { prefab, init } => inspect::<DefaultBackend>(&prefab, init, &device),
        Command::Calibrate {
            prefab,
            weights,
            data,
            batch_size,
            num_images,
            seed,
            threshold,
            out,
        } => calibrate::<DefaultBackend>(
            &prefab,
            weights.as_deref(),
            &data,
            batch_size,
            num_images,
            seed,
            threshold,
            &out,
            &device,
        ),
        Command::Eval {
            model_dir,
            data,
            batch_size,
            num_images,
            seed,
            threshold,
            info_root,
            model_name,
            dataset,
            threat_model,
            robust_acc,
            eps,
        } => {
            let accuracy = eval::<DefaultBackend>(
                &model_dir, &data, batch_size, num_images, seed, threshold, &device,
            )?;
            println!("clean accuracy: {:.2}%", accuracy * 100.0);

            if let Some(root) = info_root {
                let robust_acc = robust_acc.context("--robust-acc is required with --info-root")?;
                let path = update_model_info(
                    &root,
                    dataset.parse::<BenchmarkDataset>()?,
                    threat_model.parse::<ThreatModel>()?,
                    &model_name,
                    accuracy * 100.0,
                    robust_acc,
                    eps,
                )?;
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Command::Leaderboard {
            root,
            dataset,
            threat_model,
        } => {
            let entries = list_model_infos(
                &root,
                dataset.parse::<BenchmarkDataset>()?,
                threat_model.parse::<ThreatModel>()?,
            )?;
            print!("{}", render_leaderboard(&entries));
            Ok(())
        }
    }
}

fn inspect<B: Backend>(
    prefab: &str,
    init: bool,
    device: &B::Device,
) -> anyhow::Result<()> {
    let prefab = lookup_prefab(prefab)?;
    let config = prefab.new_config();
    println!("{}: {}", prefab.name, prefab.description);
    println!("{config}");

    if init {
        let model: Classifier<B> = config.init(device);
        println!("parameters: {}", model.num_params());
        println!("MeanSparse layers: {}", model.num_sparse_layers());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn calibrate<B: Backend>(
    prefab: &str,
    weights: Option<&Path>,
    data: &Path,
    batch_size: usize,
    num_images: Option<usize>,
    seed: u64,
    threshold: f64,
    out: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    anyhow::ensure!(batch_size > 0, "--batch-size must be > 0");

    let config = lookup_prefab(prefab)?.new_config();
    let model: Classifier<B> = config.init(device);

    let model = match (weights, model) {
        (None, model) => model,
        (Some(path), Classifier::WideResNet(model)) => {
            Classifier::WideResNet(load_pytorch_weights(model, path, None)?)
        }
        (Some(_), model) => anyhow::bail!(
            "checkpoint import is not supported for {}",
            model.architecture()
        ),
    };

    let (images, _labels) = data::load_image_folder::<B>(data, num_images, seed, device)?;
    let batches = data::into_batches(images, batch_size);

    let model = calibrate_statistics(model, batches).with_threshold(threshold);

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    config
        .save(out.join(CONFIG_FILE))
        .context("saving model config")?;
    model
        .save_file(out.join(MODEL_FILE), &CompactRecorder::new())
        .context("saving model record")?;

    tracing::info!(out = %out.display(), "saved calibrated model");
    Ok(())
}

fn eval<B: Backend>(
    model_dir: &Path,
    data: &Path,
    batch_size: usize,
    num_images: Option<usize>,
    seed: u64,
    threshold: Option<f64>,
    device: &B::Device,
) -> anyhow::Result<f64> {
    anyhow::ensure!(batch_size > 0, "--batch-size must be > 0");

    let config = ClassifierConfig::load(model_dir.join(CONFIG_FILE))
        .with_context(|| format!("loading {}", model_dir.join(CONFIG_FILE).display()))?;
    let model: Classifier<B> = config
        .init(device)
        .load_file(model_dir.join(MODEL_FILE), &CompactRecorder::new(), device)
        .context("loading model record")?;

    let model = match threshold {
        Some(threshold) => model.with_threshold(threshold),
        None => model,
    };
    tracing::info!(thresholds = ?model.thresholds().first(), "evaluating");

    let (images, labels) = data::load_image_folder::<B>(data, num_images, seed, device)?;
    Ok(clean_accuracy(&model, images, labels, batch_size))
}
