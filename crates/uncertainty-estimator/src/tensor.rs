use std::slice::ChunksMut;

use nalgebra::DMatrix;
use uq_core::{UqError, UqResult};

/// Pre-sized (L, N, C) buffer of stochastic predictions.
///
/// Stored pass-major so each pass owns one contiguous N*C slice; parallel
/// passes write disjoint slices without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionTensor {
    passes: usize,
    images: usize,
    classes: usize,
    data: Vec<f64>,
}

impl PredictionTensor {
    pub fn new(passes: usize, images: usize, classes: usize) -> Self {
        Self {
            passes,
            images,
            classes,
            data: vec![0.0; passes * images * classes],
        }
    }

    /// (L, N, C)
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.passes, self.images, self.classes)
    }

    fn pass_len(&self) -> usize {
        self.images * self.classes
    }

    /// Mutable N*C slices, one per pass, in pass order.
    pub fn passes_mut(&mut self) -> ChunksMut<'_, f64> {
        let len = self.pass_len().max(1);
        self.data.chunks_mut(len)
    }

    /// Mutable N*C slice of one pass
    pub fn pass_mut(&mut self, pass: usize) -> &mut [f64] {
        let len = self.pass_len();
        &mut self.data[pass * len..(pass + 1) * len]
    }

    /// Probability vector for one image on one pass
    pub fn sample(&self, pass: usize, image: usize) -> &[f64] {
        let start = pass * self.pass_len() + image * self.classes;
        &self.data[start..start + self.classes]
    }

    /// The L probability vectors of one image, in pass order.
    pub fn image_samples(&self, image: usize) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.passes).map(move |pass| self.sample(pass, image))
    }

    /// One uncertainty score per image. Call only once every pass is filled.
    pub fn reduce(&self) -> Vec<f64> {
        (0..self.images)
            .map(|image| dispersion(self.image_samples(image)))
            .collect()
    }
}

/// Copy an N x C probability matrix into a pass slice, row-major.
pub(crate) fn fill_pass(slice: &mut [f64], probs: &DMatrix<f64>) -> UqResult<()> {
    if slice.len() != probs.len() {
        return Err(UqError::shape_mismatch(
            format!("{} values per pass", slice.len()),
            format!("{}x{} output", probs.nrows(), probs.ncols()),
        ));
    }

    let classes = probs.ncols();
    for (image, row) in probs.row_iter().enumerate() {
        for (class, value) in row.iter().enumerate() {
            slice[image * classes + class] = *value;
        }
    }
    Ok(())
}

/// Average energy minus energy of the average over a set of probability vectors.
///
/// `(1/L) Σ ||p_l||² − ||(1/L) Σ p_l||²`, which equals the sum over classes of
/// each class probability's variance across the samples. Symmetric in the
/// samples and never negative; rounding residue below zero is clamped.
pub fn dispersion<'a, I>(samples: I) -> f64
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut count = 0usize;
    let mut energy = 0.0;
    let mut total: Vec<f64> = Vec::new();

    for p in samples {
        if total.is_empty() {
            total = vec![0.0; p.len()];
        }
        for (t, v) in total.iter_mut().zip(p) {
            *t += v;
        }
        energy += p.iter().map(|v| v * v).sum::<f64>();
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let l = count as f64;
    let mean_energy: f64 = total.iter().map(|t| (t / l).powi(2)).sum();
    (energy / l - mean_energy).max(0.0)
}
