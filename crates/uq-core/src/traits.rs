use std::sync::Arc;

use nalgebra::DMatrix;
use rand::RngCore;

use crate::{ImageBatch, ImageShape, InferenceMode, UqResult};

/// A trained classifier whose forward pass may contain dropout units.
///
/// Parameters are read-only for the duration of a call, so a single model
/// can be shared across threads running independent passes.
pub trait StochasticModel: Send + Sync {
    /// Per-image shape the model accepts
    fn input_shape(&self) -> ImageShape;

    /// Number of classes C in each output row
    fn num_classes(&self) -> usize;

    /// Run one forward pass over the batch and return an N x C matrix of
    /// class probabilities. In `InferenceMode::Stochastic` every dropout unit
    /// draws its mask from `rng`.
    fn forward(
        &self,
        batch: &ImageBatch,
        mode: InferenceMode,
        rng: &mut dyn RngCore,
    ) -> UqResult<DMatrix<f64>>;
}

/// A model that can differentiate its deterministic loss with respect to the input.
pub trait InputGradient: StochasticModel {
    /// Gradient of the cross-entropy loss for class `target` with respect to
    /// one flattened input image, dropout disabled.
    fn input_gradient(&self, image: &[f64], target: usize) -> UqResult<Vec<f64>>;
}

impl<M: StochasticModel + ?Sized> StochasticModel for Arc<M> {
    fn input_shape(&self) -> ImageShape {
        (**self).input_shape()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn forward(
        &self,
        batch: &ImageBatch,
        mode: InferenceMode,
        rng: &mut dyn RngCore,
    ) -> UqResult<DMatrix<f64>> {
        (**self).forward(batch, mode, rng)
    }
}

impl<M: InputGradient + ?Sized> InputGradient for Arc<M> {
    fn input_gradient(&self, image: &[f64], target: usize) -> UqResult<Vec<f64>> {
        (**self).input_gradient(image, target)
    }
}
