//! Score Comparison
//!
//! Summarizes clean and adversarial uncertainty-score distributions for
//! downstream review. Two score sets are only comparable when they were
//! produced with the same number of passes over the same class count.
//! No decision threshold is chosen here.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::Statistics;
use uq_core::{UqError, UqResult};

/// Uncertainty scores for one batch plus the scale they were produced on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub scores: Vec<f64>,
    /// Stochastic passes L per image
    pub passes: usize,
    /// Classes C per prediction vector
    pub classes: usize,
}

impl ScoreSet {
    pub fn new(scores: Vec<f64>, passes: usize, classes: usize) -> Self {
        Self {
            scores,
            passes,
            classes,
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.as_slice().mean()
    }

    /// Error unless both sets share passes and class count.
    pub fn ensure_comparable(&self, other: &ScoreSet) -> UqResult<()> {
        if self.passes != other.passes {
            return Err(UqError::IncomparableScores(format!(
                "{} passes vs {} passes",
                self.passes, other.passes
            )));
        }
        if self.classes != other.classes {
            return Err(UqError::IncomparableScores(format!(
                "{} classes vs {} classes",
                self.classes, other.classes
            )));
        }
        Ok(())
    }
}

/// Descriptive statistics of one score distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub percentile_5: f64,
    pub percentile_95: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let std_dev = if scores.len() > 1 { scores.std_dev() } else { 0.0 };

        Some(Self {
            count: scores.len(),
            mean: scores.mean(),
            std_dev,
            median: percentile_sorted(&sorted, 50.0),
            percentile_5: percentile_sorted(&sorted, 5.0),
            percentile_95: percentile_sorted(&sorted, 95.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Bin counts for both distributions over shared edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` ascending edges
    pub edges: Vec<f64>,
    pub clean: Vec<usize>,
    pub adversarial: Vec<usize>,
}

impl Histogram {
    pub fn build(clean: &[f64], adversarial: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let all = clean.iter().chain(adversarial.iter()).copied();
        let lo = all.clone().fold(f64::INFINITY, f64::min);
        let hi = all.fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if lo.is_finite() && hi.is_finite() {
            (lo, hi)
        } else {
            (0.0, 0.0)
        };
        let width = (hi - lo) / bins as f64;

        let edges = (0..=bins).map(|i| lo + width * i as f64).collect();
        let count = |scores: &[f64]| {
            let mut counts = vec![0usize; bins];
            for s in scores {
                let idx = if width > 0.0 {
                    (((s - lo) / width).floor() as usize).min(bins - 1)
                } else {
                    0
                };
                counts[idx] += 1;
            }
            counts
        };

        Self {
            edges,
            clean: count(clean),
            adversarial: count(adversarial),
        }
    }
}

/// Welch's unequal-variance t-test for adversarial mean > clean mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelchTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// One-sided p-value
    pub p_value: f64,
}

impl WelchTest {
    /// `None` when either side has fewer than two scores or both have zero variance.
    pub fn compute(clean: &[f64], adversarial: &[f64]) -> Option<Self> {
        if clean.len() < 2 || adversarial.len() < 2 {
            return None;
        }

        let (n1, n2) = (clean.len() as f64, adversarial.len() as f64);
        let a1 = clean.variance() / n1;
        let a2 = adversarial.variance() / n2;
        let se2 = a1 + a2;
        if !(se2 > 0.0) {
            return None;
        }

        let t_statistic = (adversarial.mean() - clean.mean()) / se2.sqrt();
        let degrees_of_freedom = se2.powi(2) / (a1.powi(2) / (n1 - 1.0) + a2.powi(2) / (n2 - 1.0));
        let dist = StudentsT::new(0.0, 1.0, degrees_of_freedom).ok()?;

        Some(Self {
            t_statistic,
            degrees_of_freedom,
            p_value: dist.sf(t_statistic),
        })
    }
}

/// Probability that a random adversarial score exceeds a random clean score,
/// ties counted as one half (Mann-Whitney U / (n1 * n2)).
pub fn auroc(clean: &[f64], adversarial: &[f64]) -> f64 {
    if clean.is_empty() || adversarial.is_empty() {
        return 0.5;
    }

    let mut pooled: Vec<(f64, bool)> = clean
        .iter()
        .map(|s| (*s, false))
        .chain(adversarial.iter().map(|s| (*s, true)))
        .collect();
    pooled.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // Average 1-based ranks across ties.
    let mut rank_sum_adv = 0.0;
    let mut i = 0;
    while i < pooled.len() {
        let mut j = i;
        while j + 1 < pooled.len() && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum_adv += pooled[i..=j].iter().filter(|(_, adv)| *adv).count() as f64 * avg_rank;
        i = j + 1;
    }

    let (n1, n2) = (clean.len() as f64, adversarial.len() as f64);
    let u = rank_sum_adv - n2 * (n2 + 1.0) / 2.0;
    u / (n1 * n2)
}

/// Side-by-side view of clean and adversarial uncertainty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComparison {
    pub passes: usize,
    pub classes: usize,
    pub clean: ScoreSummary,
    pub adversarial: ScoreSummary,
    /// adversarial mean minus clean mean
    pub mean_difference: f64,
    pub welch: Option<WelchTest>,
    pub auroc: f64,
    pub histogram: Histogram,
}

impl ScoreComparison {
    /// Whether the data agree with "adversarial inputs are more uncertain"
    pub fn adversarial_exceeds_clean(&self) -> bool {
        self.mean_difference > 0.0
    }
}

/// Compare two score sets produced on the same scale.
pub fn compare(clean: &ScoreSet, adversarial: &ScoreSet, bins: usize) -> UqResult<ScoreComparison> {
    clean.ensure_comparable(adversarial)?;

    let clean_summary = ScoreSummary::from_scores(&clean.scores).ok_or(UqError::EmptyBatch)?;
    let adv_summary = ScoreSummary::from_scores(&adversarial.scores).ok_or(UqError::EmptyBatch)?;

    Ok(ScoreComparison {
        passes: clean.passes,
        classes: clean.classes,
        mean_difference: adv_summary.mean - clean_summary.mean,
        clean: clean_summary,
        adversarial: adv_summary,
        welch: WelchTest::compute(&clean.scores, &adversarial.scores),
        auroc: auroc(&clean.scores, &adversarial.scores),
        histogram: Histogram::build(&clean.scores, &adversarial.scores, bins),
    })
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
