//! uq-runner: end-to-end Monte Carlo dropout experiment.
//!
//! Labels clean images with the deterministic model, perturbs them with the
//! adversarial probe, scores both batches with the uncertainty estimator and
//! reports how the two score distributions compare.

pub mod config;
pub mod dataset;
pub mod experiment;
pub mod synthetic;

pub use config::RunnerConfig;
pub use experiment::{run_experiment, ExperimentReport, ExperimentSettings};
