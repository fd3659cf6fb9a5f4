use stochastic_predictor::DEFAULT_PROBABILITY_TOLERANCE;

/// Default number of stochastic passes per image
pub const DEFAULT_PASSES: usize = 100;

/// Configuration for an estimation run
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Number of stochastic passes L (at least 2)
    pub passes: usize,
    /// Run passes on the rayon thread pool
    pub parallel: bool,
    /// Base seed for the per-pass RNG streams; `None` draws a fresh one per run
    pub seed: Option<u64>,
    /// Allowed deviation of a probability row sum from 1.0
    pub probability_tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            passes: DEFAULT_PASSES,
            parallel: false,
            seed: None,
            probability_tolerance: DEFAULT_PROBABILITY_TOLERANCE,
        }
    }
}

impl EstimatorConfig {
    /// Defaults overridden by `UQ_PASSES`, `UQ_PARALLEL`, `UQ_SEED` and
    /// `UQ_PROB_TOLERANCE`. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            passes: env_parse("UQ_PASSES").unwrap_or(defaults.passes),
            parallel: std::env::var("UQ_PARALLEL")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.parallel),
            seed: env_parse("UQ_SEED").or(defaults.seed),
            probability_tolerance: env_parse("UQ_PROB_TOLERANCE")
                .unwrap_or(defaults.probability_tolerance),
        }
    }

    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Parse an env var, warning and returning `None` when it is set but malformed.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EstimatorConfig::default();
        assert_eq!(config.passes, 100);
        assert!(!config.parallel);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_builders() {
        let config = EstimatorConfig::default()
            .with_passes(30)
            .with_seed(9)
            .with_parallel(true);
        assert_eq!(config.passes, 30);
        assert_eq!(config.seed, Some(9));
        assert!(config.parallel);
    }

    #[test]
    fn test_env_parse_ignores_malformed_values() {
        std::env::set_var("UQ_ESTIMATOR_TEST_NUMBER", " 17 ");
        std::env::set_var("UQ_ESTIMATOR_TEST_GARBAGE", "seventeen");

        assert_eq!(env_parse::<usize>("UQ_ESTIMATOR_TEST_NUMBER"), Some(17));
        assert_eq!(env_parse::<usize>("UQ_ESTIMATOR_TEST_GARBAGE"), None);
        assert_eq!(env_parse::<usize>("UQ_ESTIMATOR_TEST_UNSET"), None);
    }

    // The only test in this crate that touches the UQ_* estimator variables.
    #[test]
    fn test_from_env_reads_variables() {
        std::env::set_var("UQ_PASSES", "250");
        std::env::set_var("UQ_PARALLEL", "true");
        std::env::set_var("UQ_SEED", "99");
        std::env::set_var("UQ_PROB_TOLERANCE", "1e-4");

        let config = EstimatorConfig::from_env();
        assert_eq!(config.passes, 250);
        assert!(config.parallel);
        assert_eq!(config.seed, Some(99));
        assert_eq!(config.probability_tolerance, 1e-4);

        std::env::set_var("UQ_PASSES", "lots");
        std::env::set_var("UQ_PARALLEL", "0");
        std::env::remove_var("UQ_SEED");
        std::env::remove_var("UQ_PROB_TOLERANCE");

        let config = EstimatorConfig::from_env();
        assert_eq!(config, EstimatorConfig::default());

        std::env::remove_var("UQ_PASSES");
        std::env::remove_var("UQ_PARALLEL");
    }
}
