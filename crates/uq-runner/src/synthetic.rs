//! Canned template-detector fixture.
//!
//! An 8x8 image is split into four 4x4 quadrants, one per class. Each class
//! gets a group of identical hidden units that average its quadrant, and
//! dropout on those units is the only source of randomness. Clean images
//! light up a single quadrant, so even a heavily thinned network agrees with
//! itself; adversarially blended images sit between classes, where dropout
//! swings the prediction from pass to pass.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stochastic_predictor::{Activation, LayerSpec, ModelSpec};
use uq_core::{ImageBatch, ImageShape, UqResult};

pub const SIDE: usize = 8;
pub const CLASSES: usize = 4;
/// Hidden units per class
pub const REPLICAS: usize = 8;
pub const DROPOUT: f64 = 0.5;
const QUADRANT: usize = SIDE / 2;
const OUTPUT_GAIN: f64 = 1.5;

pub fn shape() -> ImageShape {
    ImageShape::new(SIDE, SIDE)
}

/// Class owning the pixel at (row, col)
fn quadrant(row: usize, col: usize) -> usize {
    (row / QUADRANT) * 2 + col / QUADRANT
}

pub fn template_model() -> ModelSpec {
    let pixels = SIDE * SIDE;
    let per_quadrant = (QUADRANT * QUADRANT) as f64;

    let detector = |class: usize| -> Vec<f64> {
        (0..pixels)
            .map(|p| {
                if quadrant(p / SIDE, p % SIDE) == class {
                    1.0 / per_quadrant
                } else {
                    0.0
                }
            })
            .collect()
    };

    let hidden: Vec<Vec<f64>> = (0..CLASSES * REPLICAS)
        .map(|unit| detector(unit / REPLICAS))
        .collect();
    let output: Vec<Vec<f64>> = (0..CLASSES)
        .map(|class| {
            (0..CLASSES * REPLICAS)
                .map(|unit| if unit / REPLICAS == class { OUTPUT_GAIN } else { 0.0 })
                .collect()
        })
        .collect();

    ModelSpec {
        input_height: SIDE,
        input_width: SIDE,
        layers: vec![
            LayerSpec {
                weights: hidden,
                bias: vec![0.0; CLASSES * REPLICAS],
                activation: Activation::Relu,
                dropout: DROPOUT,
            },
            LayerSpec {
                weights: output,
                bias: vec![0.0; CLASSES],
                activation: Activation::Identity,
                dropout: 0.0,
            },
        ],
    }
}

/// `count` clean images cycling through the classes, with their true classes.
pub fn template_images(count: usize, seed: u64) -> UqResult<(ImageBatch, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut images = Vec::with_capacity(count);
    let mut classes = Vec::with_capacity(count);

    for i in 0..count {
        let class = i % CLASSES;
        let image: Vec<f64> = (0..SIDE * SIDE)
            .map(|p| {
                if quadrant(p / SIDE, p % SIDE) == class {
                    rng.gen_range(0.8..=1.0)
                } else {
                    rng.gen_range(0.0..=0.1)
                }
            })
            .collect();
        images.push(image);
        classes.push(class);
    }

    Ok((ImageBatch::from_images(shape(), &images)?, classes))
}
