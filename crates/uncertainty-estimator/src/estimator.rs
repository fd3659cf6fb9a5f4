use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use stochastic_predictor::StochasticPredictor;
use uq_core::{ImageBatch, StochasticModel, UqError, UqResult};

use crate::comparison::ScoreSet;
use crate::config::EstimatorConfig;
use crate::tensor::{fill_pass, PredictionTensor};

/// Monte Carlo dropout uncertainty estimator.
///
/// Runs the stochastic predictor L times over a fixed batch and reduces each
/// image's L prediction vectors to one dispersion score.
pub struct UncertaintyEstimator<M> {
    predictor: StochasticPredictor<M>,
    config: EstimatorConfig,
}

impl<M: StochasticModel> UncertaintyEstimator<M> {
    pub fn new(model: M, config: EstimatorConfig) -> Self {
        let predictor = StochasticPredictor::with_tolerance(model, config.probability_tolerance);
        Self { predictor, config }
    }

    pub fn from_predictor(predictor: StochasticPredictor<M>, config: EstimatorConfig) -> Self {
        Self { predictor, config }
    }

    pub fn predictor(&self) -> &StochasticPredictor<M> {
        &self.predictor
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Score a batch using the configured number of passes.
    pub fn estimate_default(&self, batch: &ImageBatch) -> UqResult<ScoreSet> {
        self.estimate(batch, self.config.passes)
    }

    /// Score every image in `batch` from `passes` stochastic forward passes.
    ///
    /// Fails with `EmptyBatch` for N = 0 and `InsufficientSamples` for L < 2
    /// before the model is invoked. Any predictor error aborts the run; no
    /// partial scores are returned.
    pub fn estimate(&self, batch: &ImageBatch, passes: usize) -> UqResult<ScoreSet> {
        if batch.is_empty() {
            return Err(UqError::EmptyBatch);
        }
        if passes < 2 {
            return Err(UqError::InsufficientSamples { passes });
        }
        batch.check_shape(self.predictor.input_shape())?;

        let classes = self.predictor.num_classes();
        if classes == 0 {
            return Err(UqError::InvalidModel("model reports zero classes".to_string()));
        }

        let base_seed = self.config.seed.unwrap_or_else(rand::random);
        tracing::info!(
            "Estimating uncertainty: {} images x {} passes x {} classes (parallel={})",
            batch.len(),
            passes,
            classes,
            self.config.parallel
        );

        let mut tensor = PredictionTensor::new(passes, batch.len(), classes);
        let run_pass = |pass: usize, slice: &mut [f64]| -> UqResult<()> {
            let mut rng = pass_rng(base_seed, pass);
            let probs = self.predictor.predict(batch, &mut rng)?;
            fill_pass(slice, &probs)
        };

        if self.config.parallel {
            tensor
                .passes_mut()
                .collect::<Vec<_>>()
                .into_par_iter()
                .enumerate()
                .try_for_each(|(pass, slice)| run_pass(pass, slice))?;
        } else {
            for (pass, slice) in tensor.passes_mut().enumerate() {
                run_pass(pass, slice)?;
                tracing::debug!("Pass {}/{} complete", pass + 1, passes);
            }
        }

        let scores = tensor.reduce();
        let set = ScoreSet::new(scores, passes, classes);
        tracing::info!(
            "Uncertainty estimated for {} images (mean score {:.6})",
            set.len(),
            set.mean()
        );
        Ok(set)
    }
}

/// Independent RNG stream for one pass, so results do not depend on the
/// order or thread in which passes run.
fn pass_rng(base_seed: u64, pass: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(pass as u64))
}
