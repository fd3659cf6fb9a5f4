//! Monte Carlo Dropout Uncertainty Estimator
//!
//! Drives a stochastic predictor for L passes over a fixed batch, collects the
//! (L, N, C) prediction tensor and reduces each image's L probability vectors
//! to a single dispersion score: mean squared norm minus squared norm of the mean.

pub mod comparison;
pub mod config;
pub mod estimator;
pub mod tensor;

#[cfg(test)]
mod tests;

pub use comparison::{compare, Histogram, ScoreComparison, ScoreSet, ScoreSummary, WelchTest};
pub use config::{env_parse, EstimatorConfig};
pub use estimator::UncertaintyEstimator;
pub use tensor::{dispersion, PredictionTensor};
