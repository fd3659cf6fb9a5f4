//! uq-runner: score clean and adversarial images with MC dropout uncertainty.
//!
//! Usage:
//!   cargo run -p uq-runner -- --synthetic --passes 100 --parallel
//!   cargo run -p uq-runner -- --model model.json --dataset mnist.json --limit 1000
//!   cargo run -p uq-runner -- --synthetic --epsilon 0.4 --steps 10 --out report.json
//!   cargo run -p uq-runner -- --export fixtures/

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use uq_runner::dataset::{load_dataset, load_model, DatasetFile};
use uq_runner::{run_experiment, synthetic, ExperimentSettings, RunnerConfig};
use stochastic_predictor::DropoutMlp;

/// Seed for the built-in image set
const SYNTHETIC_IMAGE_SEED: u64 = 42;

const USAGE: &str = "\
usage: uq-runner (--synthetic | --model FILE --dataset FILE) [options]
       uq-runner --export DIR

options:
  --limit N      clean images to score (default 1000)
  --passes L     stochastic passes per image (default 100)
  --epsilon E    attack budget in pixel units (default 0.3)
  --steps K      attack steps (default 10)
  --seed S       fix the dropout mask streams
  --parallel     spread passes across threads
  --bins B       histogram bins (default 20)
  --out FILE     write the JSON report here instead of stdout";

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "uq_runner=info,uncertainty_estimator=info,adversarial_probe=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let config = RunnerConfig::from_env().apply_args(&args)?;
    if let Err(e) = config.validate() {
        eprintln!("error: {e}\n\n{USAGE}");
        std::process::exit(1);
    }

    if let Some(dir) = &config.export_dir {
        return export_fixture(dir, config.limit);
    }

    let (model, clean) = if config.synthetic {
        let model = DropoutMlp::from_spec(&synthetic::template_model())?;
        let (images, _) = synthetic::template_images(config.limit, SYNTHETIC_IMAGE_SEED)?;
        tracing::info!("Using built-in template model and {} images", images.len());
        (model, images)
    } else {
        // validate() guarantees both paths outside synthetic mode
        let model_path = config.model_path.as_deref().context("--model is required")?;
        let dataset_path = config.dataset_path.as_deref().context("--dataset is required")?;
        let model = load_model(model_path)?;
        let images = load_dataset(dataset_path)?.truncate(config.limit);
        (model, images)
    };

    tracing::info!(
        "Running experiment: {} clean images, {} passes, epsilon={}, steps={}",
        clean.len(),
        config.estimator.passes,
        config.attack.epsilon,
        config.attack.steps
    );

    let report = run_experiment(Arc::new(model), &clean, &ExperimentSettings::from(&config))?;
    let json = serde_json::to_string_pretty(&report)?;

    match &config.out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }

    let verdict = if report.adversarial_exceeds_clean() {
        "adversarial images are more uncertain"
    } else {
        "adversarial images are NOT more uncertain"
    };
    tracing::info!(
        "Done: {} clean vs {} adversarial (of {} requested), mean difference {:+.6}: {}",
        report.clean_images,
        report.produced_adversarial,
        report.requested_adversarial,
        report.comparison.mean_difference,
        verdict
    );

    Ok(())
}

fn export_fixture(dir: &Path, limit: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let model_path = dir.join("model.json");
    std::fs::write(&model_path, serde_json::to_string_pretty(&synthetic::template_model())?)
        .with_context(|| format!("failed to write {}", model_path.display()))?;

    let (images, _) = synthetic::template_images(limit, SYNTHETIC_IMAGE_SEED)?;
    let dataset_path = dir.join("dataset.json");
    std::fs::write(&dataset_path, serde_json::to_string(&DatasetFile::from_batch(&images))?)
        .with_context(|| format!("failed to write {}", dataset_path.display()))?;

    tracing::info!(
        "Exported template model and {} images to {}",
        images.len(),
        dir.display()
    );
    Ok(())
}
