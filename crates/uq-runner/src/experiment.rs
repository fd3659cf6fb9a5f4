use std::sync::Arc;

use adversarial_probe::{AdversarialGenerator, AttackConfig, IterativeFgsm};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uncertainty_estimator::{compare, EstimatorConfig, ScoreComparison, UncertaintyEstimator};
use uq_core::{ImageBatch, InputGradient, UqResult};

use crate::config::RunnerConfig;

/// Knobs for one clean-vs-adversarial run
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub estimator: EstimatorConfig,
    pub attack: AttackConfig,
    pub bins: usize,
}

impl From<&RunnerConfig> for ExperimentSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            estimator: config.estimator.clone(),
            attack: config.attack,
            bins: config.bins,
        }
    }
}

/// Result of a run, ready for a presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub generated_at: DateTime<Utc>,
    pub passes: usize,
    pub classes: usize,
    pub clean_images: usize,
    pub requested_adversarial: usize,
    /// May be lower than requested when some attacks fail to flip the label
    pub produced_adversarial: usize,
    pub epsilon: f64,
    pub attack_steps: usize,
    pub clean_scores: Vec<f64>,
    pub adversarial_scores: Vec<f64>,
    pub comparison: ScoreComparison,
}

impl ExperimentReport {
    pub fn adversarial_exceeds_clean(&self) -> bool {
        self.comparison.adversarial_exceeds_clean()
    }
}

/// Label clean images, attack them and score both batches on the same scale.
///
/// The adversarial count is re-read from the generator's output. A shortfall
/// is logged and recorded in the report; scoring continues on whatever the
/// generator produced, and fails with `EmptyBatch` if it produced nothing.
pub fn run_experiment<M>(
    model: Arc<M>,
    clean: &ImageBatch,
    settings: &ExperimentSettings,
) -> UqResult<ExperimentReport>
where
    M: InputGradient + 'static,
{
    let passes = settings.estimator.passes;
    let estimator = UncertaintyEstimator::new(Arc::clone(&model), settings.estimator.clone());

    let labels = estimator.predictor().predict_labels(clean)?;
    let attack = IterativeFgsm::new(Arc::clone(&model), settings.attack)?;
    let adversarial = attack.generate(clean, &labels)?;

    if adversarial.shortfall() > 0 {
        tracing::warn!(
            "Adversarial generator returned {} of {} requested images; scoring the {} produced",
            adversarial.produced(),
            adversarial.requested,
            adversarial.produced()
        );
    }

    let clean_scores = estimator.estimate(clean, passes)?;
    let adversarial_scores = estimator.estimate(&adversarial.images, passes)?;
    let comparison = compare(&clean_scores, &adversarial_scores, settings.bins)?;

    tracing::info!(
        "Mean uncertainty: clean {:.6}, adversarial {:.6} (AUROC {:.3})",
        comparison.clean.mean,
        comparison.adversarial.mean,
        comparison.auroc
    );

    Ok(ExperimentReport {
        generated_at: Utc::now(),
        passes,
        classes: clean_scores.classes,
        clean_images: clean.len(),
        requested_adversarial: adversarial.requested,
        produced_adversarial: adversarial.produced(),
        epsilon: settings.attack.epsilon,
        attack_steps: settings.attack.steps,
        clean_scores: clean_scores.scores,
        adversarial_scores: adversarial_scores.scores,
        comparison,
    })
}
