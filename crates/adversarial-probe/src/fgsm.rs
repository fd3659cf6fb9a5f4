use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use stochastic_predictor::StochasticPredictor;
use uq_core::{ImageBatch, InputGradient, UqError, UqResult};

/// Perturbed images plus where they came from.
///
/// A generator may succeed on fewer images than it was given, so `images`
/// can be shorter than `requested`; always read the produced count from here.
#[derive(Debug, Clone)]
pub struct AdversarialBatch {
    pub images: ImageBatch,
    /// Index in the clean batch of each returned image
    pub source_indices: Vec<usize>,
    /// Number of clean images the generator was asked to perturb
    pub requested: usize,
}

impl AdversarialBatch {
    pub fn produced(&self) -> usize {
        self.images.len()
    }

    /// Requested images that could not be perturbed into a misclassification
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.produced())
    }
}

/// Maps clean images and their labels to adversarially perturbed images.
pub trait AdversarialGenerator {
    fn generate(&self, clean: &ImageBatch, labels: &[usize]) -> UqResult<AdversarialBatch>;
}

/// Attack strength
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackConfig {
    /// L-infinity perturbation budget
    pub epsilon: f64,
    /// Signed-gradient steps of size `epsilon / steps`; 1 is plain FGSM
    pub steps: usize,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            steps: 10,
        }
    }
}

/// Iterative fast gradient sign method
pub struct IterativeFgsm<M> {
    predictor: StochasticPredictor<M>,
    config: AttackConfig,
}

impl<M: InputGradient> IterativeFgsm<M> {
    pub fn new(model: M, config: AttackConfig) -> UqResult<Self> {
        if !(config.epsilon > 0.0 && config.epsilon <= 1.0) {
            return Err(UqError::InvalidConfig(format!(
                "epsilon {} outside (0, 1]",
                config.epsilon
            )));
        }
        if config.steps == 0 {
            return Err(UqError::InvalidConfig("attack needs at least one step".to_string()));
        }

        Ok(Self {
            predictor: StochasticPredictor::new(model),
            config,
        })
    }

    pub fn config(&self) -> AttackConfig {
        self.config
    }

    /// Perturb one image away from `label`, staying within the epsilon ball and [0, 1].
    fn perturb(&self, original: &[f64], label: usize) -> UqResult<Vec<f64>> {
        let eps = self.config.epsilon;
        let step = eps / self.config.steps as f64;
        let mut x = original.to_vec();

        for _ in 0..self.config.steps {
            let grad = self.predictor.model().input_gradient(&x, label)?;
            for ((xi, gi), oi) in x.iter_mut().zip(&grad).zip(original) {
                let moved = *xi + step * sign(*gi);
                *xi = moved.clamp(oi - eps, oi + eps).clamp(0.0, 1.0);
            }
        }

        Ok(x)
    }
}

impl<M: InputGradient> AdversarialGenerator for IterativeFgsm<M> {
    fn generate(&self, clean: &ImageBatch, labels: &[usize]) -> UqResult<AdversarialBatch> {
        clean.check_shape(self.predictor.input_shape())?;
        if labels.len() != clean.len() {
            return Err(UqError::shape_mismatch(
                format!("{} labels", clean.len()),
                format!("{} labels", labels.len()),
            ));
        }

        let requested = clean.len();
        if requested == 0 {
            return Ok(AdversarialBatch {
                images: ImageBatch::empty(clean.shape()),
                source_indices: Vec::new(),
                requested,
            });
        }

        let width = clean.shape().pixels();
        let mut data = Vec::with_capacity(requested * width);
        for (index, &label) in labels.iter().enumerate() {
            data.extend(self.perturb(&clean.image(index), label)?);
        }
        let candidates =
            ImageBatch::new(clean.shape(), DMatrix::from_row_slice(requested, width, &data))?;

        // Keep only the images whose deterministic prediction moved off the label.
        let predicted = self.predictor.predict_labels(&candidates)?;
        let source_indices: Vec<usize> = predicted
            .iter()
            .zip(labels)
            .enumerate()
            .filter(|(_, (p, l))| p != l)
            .map(|(i, _)| i)
            .collect();

        let images = candidates.select(&source_indices);
        tracing::info!(
            "Adversarial generation: {}/{} images misclassified (epsilon={}, steps={})",
            images.len(),
            requested,
            self.config.epsilon,
            self.config.steps
        );

        Ok(AdversarialBatch {
            images,
            source_indices,
            requested,
        })
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use stochastic_predictor::{Activation, DropoutMlp, LayerSpec, ModelSpec};
    use uq_core::ImageShape;

    /// Two-class linear model on a 1x2 image: class 0 likes pixel 0, class 1 likes pixel 1.
    fn linear_model() -> DropoutMlp {
        DropoutMlp::from_spec(&ModelSpec {
            input_height: 1,
            input_width: 2,
            layers: vec![
                LayerSpec {
                    weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Relu,
                    dropout: 0.5,
                },
                LayerSpec {
                    weights: vec![vec![4.0, -4.0], vec![-4.0, 4.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Identity,
                    dropout: 0.0,
                },
            ],
        })
        .unwrap()
    }

    fn clean_batch() -> ImageBatch {
        ImageBatch::from_images(
            ImageShape::new(1, 2),
            &[vec![0.7, 0.3], vec![0.2, 0.9], vec![0.55, 0.45]],
        )
        .unwrap()
    }

    #[test]
    fn test_large_budget_flips_every_label() {
        let attack = IterativeFgsm::new(linear_model(), AttackConfig { epsilon: 0.5, steps: 5 }).unwrap();
        let labels = vec![0, 1, 0];

        let adv = attack.generate(&clean_batch(), &labels).unwrap();
        assert_eq!(adv.requested, 3);
        assert_eq!(adv.produced(), 3);
        assert_eq!(adv.source_indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_small_budget_returns_fewer_images() {
        let attack = IterativeFgsm::new(linear_model(), AttackConfig { epsilon: 0.1, steps: 1 }).unwrap();
        let labels = vec![0, 1, 0];

        let adv = attack.generate(&clean_batch(), &labels).unwrap();
        // Only the near-boundary third image can cross with a 0.1 budget.
        assert_eq!(adv.source_indices, vec![2]);
        assert_eq!(adv.produced(), 1);
        assert_eq!(adv.shortfall(), 2);
    }

    #[test]
    fn test_perturbation_stays_in_budget_and_range() {
        let attack = IterativeFgsm::new(linear_model(), AttackConfig { epsilon: 0.4, steps: 8 }).unwrap();
        let clean = clean_batch();
        let adv = attack.generate(&clean, &[0, 1, 0]).unwrap();

        for (row, &source) in adv.source_indices.iter().enumerate() {
            let original = clean.image(source);
            let perturbed = adv.images.image(row);
            for (o, p) in original.iter().zip(&perturbed) {
                assert_abs_diff_eq!(*o, *p, epsilon = 0.4 + 1e-12);
                assert!((0.0..=1.0).contains(p));
            }
        }
    }

    #[test]
    fn test_shortfall_never_underflows() {
        let batch = AdversarialBatch {
            images: clean_batch().select(&[0, 1]),
            source_indices: vec![0, 1],
            requested: 1,
        };
        assert_eq!(batch.produced(), 2);
        assert_eq!(batch.shortfall(), 0);

        let batch = AdversarialBatch {
            images: clean_batch().select(&[2]),
            source_indices: vec![2],
            requested: 3,
        };
        assert_eq!(batch.shortfall(), 2);
    }

    #[test]
    fn test_label_count_must_match() {
        let attack = IterativeFgsm::new(linear_model(), AttackConfig::default()).unwrap();
        let err = attack.generate(&clean_batch(), &[0, 1]).unwrap_err();
        assert!(matches!(err, UqError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_invalid_attack_config() {
        assert!(matches!(
            IterativeFgsm::new(linear_model(), AttackConfig { epsilon: 0.0, steps: 1 }),
            Err(UqError::InvalidConfig(_))
        ));
        assert!(matches!(
            IterativeFgsm::new(linear_model(), AttackConfig { epsilon: 0.2, steps: 0 }),
            Err(UqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(2.5), 1.0);
        assert_eq!(sign(-1e-300), -1.0);
    }
}
