//! Error taxonomy shared by the linear-map, integrator and estimator layers.

use thiserror::Error;

/// Canonical error type for envelope calculations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    /// Missing or malformed input detected while setting something up.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two operands (or an operand and a container) disagree on dimension.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Dimension required by the operation.
        expected: usize,
        /// Dimension actually supplied.
        found: usize,
    },

    /// Singular inversion, rank deficiency or a non-physical intermediate.
    #[error("numeric domain error: {0}")]
    NumericDomain(String),

    /// The fixed-point iteration hit its cap without meeting tolerance.
    #[error("no convergence after {iterations} iterations (convergence error {error:e})")]
    ConvergenceFailure {
        /// Number of iterations performed.
        iterations: usize,
        /// Convergence error of the last iteration.
        error: f64,
    },
}

impl EnvelopeError {
    /// Shorthand for a [`EnvelopeError::Configuration`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for a [`EnvelopeError::NumericDomain`] error.
    pub fn numeric(message: impl Into<String>) -> Self {
        Self::NumericDomain(message.into())
    }

    /// Whether the error belongs to the setup-time configuration family.
    ///
    /// Dimension mismatches count as configuration errors: they are caught
    /// when operands are assembled, never recovered from.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::DimensionMismatch { .. })
    }

    /// Whether the error is a numeric-domain condition.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::NumericDomain(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert!(EnvelopeError::config("bad profile").is_configuration());
        assert!(EnvelopeError::DimensionMismatch { expected: 7, found: 6 }.is_configuration());
        assert!(EnvelopeError::numeric("singular").is_numeric());
        let failure = EnvelopeError::ConvergenceFailure { iterations: 12, error: 0.5 };
        assert!(!failure.is_configuration());
        assert!(!failure.is_numeric());
    }

    #[test]
    fn test_display() {
        let err = EnvelopeError::DimensionMismatch { expected: 3, found: 2 };
        assert_eq!(err.to_string(), "dimension mismatch: expected 3, found 2");
        let err = EnvelopeError::ConvergenceFailure { iterations: 4, error: 0.25 };
        assert!(err.to_string().contains("after 4 iterations"));
    }
}
