//! Engine configuration.
//!
//! [`DictFactConfig`] is an immutable value handed to
//! [`DictFact::new`](crate::DictFact::new); the engine never mutates it. It
//! serializes with serde so experiment settings can live in JSON next to the
//! data they were run on.

use serde::{Deserialize, Serialize};

use crate::error::{DictFactError, Result};

/// How a per-batch quantity (cross-products `Dx` or the Gram matrix `G`)
/// is aggregated when only a subset of features is visible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Exact quantity over all features.
    Full,
    /// Subset estimate rescaled by the reduction factor.
    #[default]
    Masked,
    /// Subset estimate blended into a per-sample running average.
    Average,
}

/// Hyperparameters of the streaming factorization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictFactConfig {
    /// Feature subsampling factor: each batch touches `n_features / reduction` features.
    pub reduction: f64,
    /// Exponent of the statistic step-size schedule.
    pub learning_rate: f64,
    /// Exponent of the per-sample averaging weight `count^(-sample_learning_rate)`.
    pub sample_learning_rate: f64,
    pub dx_agg: Aggregation,
    pub g_agg: Aggregation,
    pub code_alpha: f64,
    pub code_l1_ratio: f64,
    pub n_epochs: usize,
    pub n_components: usize,
    pub batch_size: usize,
    /// Constrain codes to be non-negative.
    pub code_pos: bool,
    /// Constrain dictionary atoms to be non-negative.
    pub comp_pos: bool,
    /// Seed for every random draw; `None` seeds from the OS.
    pub random_state: Option<u64>,
    pub comp_l1_ratio: f64,
    /// Number of log-spaced progress checkpoints over a `fit` (0 = silent).
    pub verbose: usize,
    pub n_threads: usize,
    /// Draw each feature subset size from `Binomial(n_features, 1/reduction)`.
    pub random_subset_size: bool,
    /// Draw feature subsets independently instead of cycling through a permutation.
    pub subset_replacement: bool,
}

impl Default for DictFactConfig {
    fn default() -> Self {
        Self {
            reduction: 1.0,
            learning_rate: 1.0,
            sample_learning_rate: 0.76,
            dx_agg: Aggregation::Masked,
            g_agg: Aggregation::Masked,
            code_alpha: 1.0,
            code_l1_ratio: 1.0,
            n_epochs: 1,
            n_components: 10,
            batch_size: 10,
            code_pos: false,
            comp_pos: false,
            random_state: None,
            comp_l1_ratio: 0.0,
            verbose: 0,
            n_threads: 1,
            random_subset_size: false,
            subset_replacement: false,
        }
    }
}

impl DictFactConfig {
    pub fn with_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_reduction(mut self, reduction: f64) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn with_learning_rates(mut self, learning_rate: f64, sample_learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self.sample_learning_rate = sample_learning_rate;
        self
    }

    /// Set both aggregation modes at once.
    pub fn with_aggregation(mut self, agg: Aggregation) -> Self {
        self.dx_agg = agg;
        self.g_agg = agg;
        self
    }

    pub fn with_dx_agg(mut self, agg: Aggregation) -> Self {
        self.dx_agg = agg;
        self
    }

    pub fn with_g_agg(mut self, agg: Aggregation) -> Self {
        self.g_agg = agg;
        self
    }

    /// Code penalty: `alpha · (l1_ratio·||a||₁ + (1 − l1_ratio)·||a||²/2)`.
    pub fn with_code_penalty(mut self, alpha: f64, l1_ratio: f64) -> Self {
        self.code_alpha = alpha;
        self.code_l1_ratio = l1_ratio;
        self
    }

    pub fn with_comp_l1_ratio(mut self, l1_ratio: f64) -> Self {
        self.comp_l1_ratio = l1_ratio;
        self
    }

    pub fn with_positivity(mut self, code_pos: bool, comp_pos: bool) -> Self {
        self.code_pos = code_pos;
        self.comp_pos = comp_pos;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_verbose(mut self, verbose: usize) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_subset_sampling(mut self, random_size: bool, replacement: bool) -> Self {
        self.random_subset_size = random_size;
        self.subset_replacement = replacement;
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(DictFactError::InvalidConfig(msg))
        }
        if !(self.reduction >= 1.0) {
            return invalid(format!("reduction must be >= 1, got {}", self.reduction));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return invalid(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            ));
        }
        if !(self.sample_learning_rate >= 0.0) {
            return invalid(format!(
                "sample_learning_rate must be >= 0, got {}",
                self.sample_learning_rate
            ));
        }
        if !(self.code_alpha >= 0.0) {
            return invalid(format!("code_alpha must be >= 0, got {}", self.code_alpha));
        }
        for (name, ratio) in [
            ("code_l1_ratio", self.code_l1_ratio),
            ("comp_l1_ratio", self.comp_l1_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return invalid(format!("{name} must be in [0, 1], got {ratio}"));
            }
        }
        if self.n_components == 0 {
            return invalid("n_components must be positive".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".into());
        }
        if self.n_threads == 0 {
            return invalid("n_threads must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DictFactConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            DictFactConfig::default().with_reduction(0.5),
            DictFactConfig::default().with_learning_rates(0.0, 0.76),
            DictFactConfig::default().with_learning_rates(1.5, 0.76),
            DictFactConfig::default().with_code_penalty(-1.0, 0.5),
            DictFactConfig::default().with_code_penalty(1.0, 1.2),
            DictFactConfig::default().with_comp_l1_ratio(-0.1),
            DictFactConfig::default().with_components(0),
            DictFactConfig::default().with_batch_size(0),
            DictFactConfig::default().with_threads(0),
            DictFactConfig::default().with_reduction(f64::NAN),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(DictFactError::InvalidConfig(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_json_round_trip() {
        let config = DictFactConfig::default()
            .with_components(5)
            .with_g_agg(Aggregation::Full)
            .with_dx_agg(Aggregation::Average)
            .with_subset_sampling(true, false)
            .with_seed(3);
        let json = config.to_json().unwrap();
        assert!(json.contains("\"average\""));
        let back = DictFactConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_json_partial_fields_use_defaults() {
        let config = DictFactConfig::from_json(r#"{"n_components": 3, "g_agg": "full"}"#).unwrap();
        assert_eq!(config.n_components, 3);
        assert_eq!(config.g_agg, Aggregation::Full);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.dx_agg, Aggregation::Masked);
        assert!(!config.subset_replacement);
    }

    #[test]
    fn test_json_errors() {
        assert!(matches!(
            DictFactConfig::from_json("{not json"),
            Err(DictFactError::ConfigParse(_))
        ));
        assert!(matches!(
            DictFactConfig::from_json(r#"{"batch_size": 0}"#),
            Err(DictFactError::InvalidConfig(_))
        ));
    }
}
