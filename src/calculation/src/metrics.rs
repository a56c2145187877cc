//! Envelope measurements and how well a covariance state reproduces them.
//!
//! Readings come from beam-size monitors along the line. The estimator, the
//! demo binaries and the tests all compare them against the envelope a
//! candidate covariance predicts through a set of transfer maps.

use serde::{Deserialize, Serialize};

use crate::covariance::CovarianceMatrix;
use crate::error::{EnvelopeError, Result};
use crate::phase::{PhaseMatrix, PhasePlane};

/// Minimum number of readings needed to pin down three moments per plane.
pub const MIN_MEASUREMENTS: usize = 3;

/// RMS beam sizes recorded at one diagnostic location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeasurement {
    /// Device identifier.
    pub location: String,
    /// Axial position from the reconstruction point (m).
    pub position: f64,
    /// RMS sizes `(σx, σy, σz)`.
    pub rms: [f64; 3],
}

impl EnvelopeMeasurement {
    /// Validated reading: finite position, finite positive sizes.
    pub fn new(location: impl Into<String>, position: f64, rms: [f64; 3]) -> Result<Self> {
        let reading = Self { location: location.into(), position, rms };
        reading.validate()?;
        Ok(reading)
    }

    /// RMS size in one plane.
    pub fn rms_size(&self, plane: PhasePlane) -> f64 {
        self.rms[plane.index()]
    }

    fn validate(&self) -> Result<()> {
        if !self.position.is_finite() {
            return Err(EnvelopeError::config(format!(
                "measurement {} has a non-finite position",
                self.location
            )));
        }
        if self.rms.iter().any(|s| !(*s > 0.0 && s.is_finite())) {
            return Err(EnvelopeError::config(format!(
                "measurement {} needs positive finite RMS sizes, got {:?}",
                self.location, self.rms
            )));
        }
        Ok(())
    }
}

/// Checks a reading set before it is handed to a reconstruction.
pub fn validate_measurements(measurements: &[EnvelopeMeasurement]) -> Result<()> {
    if measurements.len() < MIN_MEASUREMENTS {
        return Err(EnvelopeError::config(format!(
            "need at least {MIN_MEASUREMENTS} envelope measurements, got {}",
            measurements.len()
        )));
    }
    measurements.iter().try_for_each(EnvelopeMeasurement::validate)
}

/// RMS sizes `σ` predicts at each map's end.
pub fn predicted_envelope(sigma: &CovarianceMatrix, maps: &[PhaseMatrix]) -> Vec<[f64; 3]> {
    maps.iter()
        .map(|map| {
            let local = sigma.propagate(map);
            PhasePlane::ALL.map(|plane| local.rms_size(plane))
        })
        .collect()
}

/// Predicted and measured size at one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeComparison {
    /// Device identifier.
    pub location: String,
    /// Axial position (m).
    pub position: f64,
    /// Predicted RMS sizes.
    pub predicted: [f64; 3],
    /// Measured RMS sizes.
    pub measured: [f64; 3],
}

impl EnvelopeComparison {
    /// Relative deviation `(predicted - measured) / measured` per plane.
    pub fn relative_deviation(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| (self.predicted[i] - self.measured[i]) / self.measured[i])
    }
}

/// Side-by-side view of predicted and measured envelopes.
pub fn compare_envelopes(
    sigma: &CovarianceMatrix,
    maps: &[PhaseMatrix],
    measurements: &[EnvelopeMeasurement],
) -> Result<Vec<EnvelopeComparison>> {
    if maps.len() != measurements.len() {
        return Err(EnvelopeError::DimensionMismatch {
            expected: measurements.len(),
            found: maps.len(),
        });
    }
    Ok(predicted_envelope(sigma, maps)
        .into_iter()
        .zip(measurements)
        .map(|(predicted, m)| EnvelopeComparison {
            location: m.location.clone(),
            position: m.position,
            predicted,
            measured: m.rms,
        })
        .collect())
}

/// RMS of the relative envelope deviations over all readings and planes.
pub fn residual_error(
    sigma: &CovarianceMatrix,
    maps: &[PhaseMatrix],
    measurements: &[EnvelopeMeasurement],
) -> Result<f64> {
    let comparisons = compare_envelopes(sigma, maps, measurements)?;
    if comparisons.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = comparisons
        .iter()
        .flat_map(|c| c.relative_deviation())
        .map(|d| d * d)
        .sum();
    Ok((sum / (3 * comparisons.len()) as f64).sqrt())
}

/// Readings a beam `sigma` would produce through `maps`, one per position.
///
/// Locations are labelled `M1`, `M2`, …
pub fn synthesize_measurements(
    sigma: &CovarianceMatrix,
    maps: &[PhaseMatrix],
    positions: &[f64],
) -> Result<Vec<EnvelopeMeasurement>> {
    if maps.len() != positions.len() {
        return Err(EnvelopeError::DimensionMismatch { expected: positions.len(), found: maps.len() });
    }
    predicted_envelope(sigma, maps)
        .into_iter()
        .zip(positions)
        .enumerate()
        .map(|(i, (rms, position))| EnvelopeMeasurement::new(format!("M{}", i + 1), *position, rms))
        .collect()
}
