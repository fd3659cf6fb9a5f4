//! Stochastic Predictor
//!
//! Keeps dropout switched on at inference time so repeated calls on the same
//! input sample different thinned sub-networks. Ships a dense dropout network
//! (`DropoutMlp`) as the concrete trained-model provider.

pub mod model;
pub mod predictor;

pub use model::{Activation, DropoutMlp, LayerSpec, ModelSpec};
pub use predictor::{validate_probabilities, StochasticPredictor, DEFAULT_PROBABILITY_TOLERANCE};
