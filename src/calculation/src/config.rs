//! Solver configuration.
//!
//! Everything here deserializes from JSON with per-field defaults, so a
//! config file only needs to name what it changes.

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::logging::LogConfig;
use crate::transfer::LongitudinalFormula;

/// Iteration controls of the fixed-point estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Convergence threshold on the relative Frobenius step `‖σₖ₊₁ - σₖ‖ / ‖σₖ‖`.
    pub tolerance: f64,
    /// Floor of the relaxation factor.
    pub default_alpha: f64,
    /// Normalized-determinant threshold below which an increment history is
    /// treated as rank deficient.
    pub rank_tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-10,
            default_alpha: 0.5,
            rank_tolerance: 1e-8,
        }
    }
}

impl EstimatorConfig {
    /// Rejects settings the iteration cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(EnvelopeError::config("max_iterations must be at least 1"));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(EnvelopeError::config(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.default_alpha > 0.0 && self.default_alpha <= 2.0) {
            return Err(EnvelopeError::config(format!(
                "default_alpha must lie in (0, 2], got {}",
                self.default_alpha
            )));
        }
        if !(self.rank_tolerance >= 0.0 && self.rank_tolerance < 1.0) {
            return Err(EnvelopeError::config(format!(
                "rank_tolerance must lie in [0, 1), got {}",
                self.rank_tolerance
            )));
        }
        Ok(())
    }
}

/// Top-level configuration read by the binaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Estimator iteration controls.
    pub estimator: EstimatorConfig,
    /// Longitudinal diagonal convention for RF gaps.
    pub longitudinal: LongitudinalFormula,
    /// Logging setup.
    pub logging: LogConfig,
}

impl SolverConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EnvelopeError::config(format!("invalid solver config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.estimator.validate()
    }

    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EnvelopeError::config(format!("cannot serialize solver config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn test_defaults() {
        let config = EstimatorConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.tolerance, 1e-10);
        assert_eq!(config.default_alpha, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SolverConfig::from_json_str(
            r#"{"estimator": {"max_iterations": 40}, "longitudinal": "quadratic"}"#,
        )
        .unwrap();
        assert_eq!(config.estimator.max_iterations, 40);
        assert_eq!(config.estimator.tolerance, 1e-10);
        assert_eq!(config.longitudinal, LongitudinalFormula::Quadratic);
        assert_eq!(config.logging.level, LogLevel::Info);

        let empty = SolverConfig::from_json_str("{}").unwrap();
        assert_eq!(empty, SolverConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        for json in [
            r#"{"estimator": {"max_iterations": 0}}"#,
            r#"{"estimator": {"tolerance": -1.0}}"#,
            r#"{"estimator": {"default_alpha": 0.0}}"#,
            r#"{"estimator": {"default_alpha": 2.5}}"#,
            r#"{"estimator": {"rank_tolerance": 1.5}}"#,
            r#"{"longitudinal": "cubic"}"#,
            "not json",
        ] {
            let err = SolverConfig::from_json_str(json).unwrap_err();
            assert!(err.is_configuration(), "{json}");
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SolverConfig::default();
        let text = config.to_json_string().unwrap();
        assert!(text.contains("log-ratio"));
        assert_eq!(SolverConfig::from_json_str(&text).unwrap(), config);
    }
}
