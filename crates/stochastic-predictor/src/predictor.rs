use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use uq_core::{ImageBatch, ImageShape, InferenceMode, StochasticModel, UqError, UqResult};

/// Allowed deviation of a probability row sum from 1.0
pub const DEFAULT_PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Wraps a trained model so dropout stays active at inference time.
///
/// Every call to [`StochasticPredictor::predict`] runs the model in
/// `InferenceMode::Stochastic`, regardless of how the model would normally be
/// evaluated, and validates that the output is a batch of probability vectors.
#[derive(Debug, Clone)]
pub struct StochasticPredictor<M> {
    model: M,
    tolerance: f64,
}

impl<M: StochasticModel> StochasticPredictor<M> {
    pub fn new(model: M) -> Self {
        Self::with_tolerance(model, DEFAULT_PROBABILITY_TOLERANCE)
    }

    pub fn with_tolerance(model: M, tolerance: f64) -> Self {
        Self { model, tolerance }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn input_shape(&self) -> ImageShape {
        self.model.input_shape()
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// One stochastic forward pass: an N x C probability matrix drawn with a
    /// fresh dropout mask from `rng`.
    pub fn predict(&self, batch: &ImageBatch, rng: &mut dyn RngCore) -> UqResult<DMatrix<f64>> {
        self.run(batch, InferenceMode::Stochastic, rng)
    }

    /// Dropout-free prediction, used to label clean images.
    pub fn predict_deterministic(&self, batch: &ImageBatch) -> UqResult<DMatrix<f64>> {
        // Never drawn from in deterministic mode.
        let mut rng = StdRng::seed_from_u64(0);
        self.run(batch, InferenceMode::Deterministic, &mut rng)
    }

    /// Argmax class of each image under the deterministic prediction.
    pub fn predict_labels(&self, batch: &ImageBatch) -> UqResult<Vec<usize>> {
        let probs = self.predict_deterministic(batch)?;
        Ok(probs.row_iter().map(|row| row.transpose().argmax().0).collect())
    }

    fn run(
        &self,
        batch: &ImageBatch,
        mode: InferenceMode,
        rng: &mut dyn RngCore,
    ) -> UqResult<DMatrix<f64>> {
        batch.check_shape(self.model.input_shape())?;

        let probs = self.model.forward(batch, mode, rng)?;
        let expected = (batch.len(), self.model.num_classes());
        if probs.shape() != expected {
            return Err(UqError::shape_mismatch(
                format!("{}x{} output", expected.0, expected.1),
                format!("{}x{} output", probs.nrows(), probs.ncols()),
            ));
        }

        validate_probabilities(&probs, self.tolerance)?;
        Ok(probs)
    }
}

/// Check every row is non-negative and sums to 1 within `tolerance`.
pub fn validate_probabilities(probs: &DMatrix<f64>, tolerance: f64) -> UqResult<()> {
    for (row, values) in probs.row_iter().enumerate() {
        if let Some(bad) = values.iter().find(|p| !p.is_finite() || **p < -tolerance) {
            return Err(UqError::InvalidProbability {
                row,
                detail: format!("entry {} is not a probability", bad),
            });
        }
        let sum = values.sum();
        if (sum - 1.0).abs() > tolerance {
            return Err(UqError::InvalidProbability {
                row,
                detail: format!("sums to {}", sum),
            });
        }
    }
    Ok(())
}
