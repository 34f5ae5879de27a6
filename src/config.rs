//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What happens to the reference when a batch raises an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceUpdate {
    /// Every batch is folded into the reference, alerting or not.
    #[default]
    Always,
    /// Batches raising a warning or drift alert are left out of the reference.
    SkipOnAlert,
    /// A drift alert restarts the reference from the drifting batch and
    /// clears the score history.
    RebaselineOnDrift,
}

/// Reaction to a batch whose attribute set differs from the stream's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Report `DriftError::Incompatible` and leave the stream untouched.
    #[default]
    Reject,
    /// Drop all accumulated state and restart the stream from this batch.
    Reset,
}

/// Per-stream tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Multiplier of σ for the warning cutoff.
    pub factor_warn: f64,
    /// Multiplier of σ for the drift cutoff. Must be >= `factor_warn`; when
    /// equal, every warning is reported as a drift.
    pub factor_change: f64,
    /// Decay applied per batch, in `[0, 1)`, to the reference weight and to
    /// the gap between the smallest and largest σ seen.
    pub factor_std_extr_forg: f64,
    /// Batches during which drift alerts are suppressed after one fired.
    pub cooldown_cycles: u32,
    /// Suppress warnings as well while cooling down.
    pub cooldown_suppresses_warnings: bool,
    /// Trailing scores kept for μ/σ. `None` keeps unbounded running moments.
    pub score_window: Option<usize>,
    /// Scores needed before thresholds become actionable.
    pub min_scores: usize,
    /// Lower bound for σ when deriving cutoffs.
    pub std_floor: f64,
    /// Cap on the effective number of summaries the reference averages over.
    pub reference_horizon: Option<usize>,
    pub reference_update: ReferenceUpdate,
    pub schema_policy: SchemaPolicy,
    /// Entries kept in the per-batch analysis log.
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            factor_warn: 2.0,
            factor_change: 3.0,
            factor_std_extr_forg: 0.0,
            cooldown_cycles: 0,
            cooldown_suppresses_warnings: false,
            score_window: Some(100),
            min_scores: 2,
            std_floor: 1e-9,
            reference_horizon: None,
            reference_update: ReferenceUpdate::Always,
            schema_policy: SchemaPolicy::Reject,
            log_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn with_factors(mut self, factor_warn: f64, factor_change: f64) -> Self {
        self.factor_warn = factor_warn;
        self.factor_change = factor_change;
        self
    }

    pub fn with_forgetting(mut self, factor: f64) -> Self {
        self.factor_std_extr_forg = factor;
        self
    }

    pub fn with_cooldown(mut self, cycles: u32) -> Self {
        self.cooldown_cycles = cycles;
        self
    }

    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("factor_warn", self.factor_warn),
            ("factor_change", self.factor_change),
            ("std_floor", self.std_floor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeFactor { name, value });
            }
        }
        if self.factor_warn > self.factor_change {
            return Err(ConfigError::FactorOrder {
                warn: self.factor_warn,
                change: self.factor_change,
            });
        }
        let forg = self.factor_std_extr_forg;
        if !forg.is_finite() || !(0.0..1.0).contains(&forg) {
            return Err(ConfigError::ForgettingOutOfRange(forg));
        }
        if let Some(window) = self.score_window {
            check_min("score_window", window, 2)?;
            check_min("min_scores (bounded by score_window)", window, self.min_scores)?;
        }
        check_min("min_scores", self.min_scores, 2)?;
        if let Some(horizon) = self.reference_horizon {
            check_min("reference_horizon", horizon, 1)?;
        }
        Ok(())
    }
}

fn check_min(name: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::TooSmall { name, min, value });
    }
    Ok(())
}
