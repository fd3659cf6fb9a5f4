use std::path::PathBuf;

use adversarial_probe::AttackConfig;
use anyhow::{bail, Context, Result};
use uncertainty_estimator::{env_parse, EstimatorConfig};

/// Default number of clean images scored
pub const DEFAULT_LIMIT: usize = 1000;
/// Default histogram resolution
pub const DEFAULT_BINS: usize = 20;

/// Everything the runner binary needs, from env vars and command-line flags.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub model_path: Option<PathBuf>,
    pub dataset_path: Option<PathBuf>,
    /// Use the built-in template model and images instead of files
    pub synthetic: bool,
    /// Write the synthetic model and dataset to this directory, then exit
    pub export_dir: Option<PathBuf>,
    pub limit: usize,
    pub bins: usize,
    pub out: Option<PathBuf>,
    pub attack: AttackConfig,
    pub estimator: EstimatorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            dataset_path: None,
            synthetic: false,
            export_dir: None,
            limit: DEFAULT_LIMIT,
            bins: DEFAULT_BINS,
            out: None,
            attack: AttackConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Read `UQ_MODEL_PATH`, `UQ_DATASET_PATH`, `UQ_LIMIT`, `UQ_EPSILON`,
    /// `UQ_ATTACK_STEPS` plus the estimator's own variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            model_path: std::env::var("UQ_MODEL_PATH").ok().map(PathBuf::from),
            dataset_path: std::env::var("UQ_DATASET_PATH").ok().map(PathBuf::from),
            limit: env_parse("UQ_LIMIT").unwrap_or(defaults.limit),
            attack: AttackConfig {
                epsilon: env_parse("UQ_EPSILON").unwrap_or(defaults.attack.epsilon),
                steps: env_parse("UQ_ATTACK_STEPS").unwrap_or(defaults.attack.steps),
            },
            estimator: EstimatorConfig::from_env(),
            ..defaults
        }
    }

    /// Override fields from `--flag value` style arguments.
    pub fn apply_args(mut self, args: &[String]) -> Result<Self> {
        if args.iter().any(|a| a == "--synthetic") {
            self.synthetic = true;
        }
        if args.iter().any(|a| a == "--parallel") {
            self.estimator.parallel = true;
        }
        if let Some(v) = flag_value(args, "--model") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = flag_value(args, "--dataset") {
            self.dataset_path = Some(PathBuf::from(v));
        }
        if let Some(v) = flag_value(args, "--export") {
            self.export_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = flag_value(args, "--out") {
            self.out = Some(PathBuf::from(v));
        }
        if let Some(v) = flag_value(args, "--limit") {
            self.limit = v.parse().with_context(|| format!("invalid --limit {v}"))?;
        }
        if let Some(v) = flag_value(args, "--bins") {
            self.bins = v.parse().with_context(|| format!("invalid --bins {v}"))?;
        }
        if let Some(v) = flag_value(args, "--passes") {
            self.estimator.passes = v.parse().with_context(|| format!("invalid --passes {v}"))?;
        }
        if let Some(v) = flag_value(args, "--seed") {
            self.estimator.seed = Some(v.parse().with_context(|| format!("invalid --seed {v}"))?);
        }
        if let Some(v) = flag_value(args, "--epsilon") {
            self.attack.epsilon = v.parse().with_context(|| format!("invalid --epsilon {v}"))?;
        }
        if let Some(v) = flag_value(args, "--steps") {
            self.attack.steps = v.parse().with_context(|| format!("invalid --steps {v}"))?;
        }
        Ok(self)
    }

    /// Check that the input source is unambiguous.
    pub fn validate(&self) -> Result<()> {
        if self.export_dir.is_some() {
            return Ok(());
        }
        if !self.synthetic && (self.model_path.is_none() || self.dataset_path.is_none()) {
            bail!("either --synthetic or both --model and --dataset are required");
        }
        if self.limit == 0 {
            bail!("--limit must be at least 1");
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
