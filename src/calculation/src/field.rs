//! Axial accelerating-field descriptions.
//!
//! A [`FieldProfile`] is a read-only table of uniformly spaced on-axis field
//! samples; once built it can be shared by any number of probe traversals.
//! [`FieldModel`] is the closed set of ways an RF element describes its field;
//! every variant resolves to a sampled profile so a single integrator serves
//! them all.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::probe::Probe;

/// Relative deviation from uniform spacing tolerated in a profile.
const SPACING_TOLERANCE: f64 = 1e-6;

/// Uniformly sampled on-axis field shape.
///
/// Samples are dimensionless shape values; the RF drive supplies the
/// amplitude in V/m.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileColumns", into = "ProfileColumns")]
pub struct FieldProfile {
    positions: Vec<f64>,
    samples: Vec<f64>,
    spacing: f64,
}

/// Serialized form of a [`FieldProfile`]; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileColumns {
    positions: Vec<f64>,
    samples: Vec<f64>,
}

impl TryFrom<ProfileColumns> for FieldProfile {
    type Error = EnvelopeError;

    fn try_from(columns: ProfileColumns) -> Result<Self> {
        FieldProfile::new(columns.positions, columns.samples)
    }
}

impl From<FieldProfile> for ProfileColumns {
    fn from(profile: FieldProfile) -> Self {
        Self { positions: profile.positions, samples: profile.samples }
    }
}

impl FieldProfile {
    /// Builds a profile from `(position, sample)` columns.
    ///
    /// Requires at least two samples, matching column lengths, finite values
    /// and strictly increasing, uniformly spaced positions.
    pub fn new(positions: Vec<f64>, samples: Vec<f64>) -> Result<Self> {
        if positions.len() != samples.len() {
            return Err(EnvelopeError::config(format!(
                "field profile has {} positions but {} samples",
                positions.len(),
                samples.len()
            )));
        }
        if samples.len() < 2 {
            return Err(EnvelopeError::config("field profile needs at least two samples"));
        }
        if positions.iter().chain(samples.iter()).any(|v| !v.is_finite()) {
            return Err(EnvelopeError::config("field profile contains non-finite values"));
        }
        let spacing = (positions[positions.len() - 1] - positions[0]) / (positions.len() - 1) as f64;
        if spacing <= 0.0 {
            return Err(EnvelopeError::config("field profile positions must increase"));
        }
        for (i, pair) in positions.windows(2).enumerate() {
            let step = pair[1] - pair[0];
            if step <= 0.0 || ((step - spacing) / spacing).abs() > SPACING_TOLERANCE {
                return Err(EnvelopeError::config(format!(
                    "field profile spacing is not uniform at sample {i} ({step} vs {spacing})"
                )));
            }
        }
        Ok(Self { positions, samples, spacing })
    }

    /// Profile of `samples` spread uniformly over `[0, length]`.
    pub fn uniform(length: f64, samples: Vec<f64>) -> Result<Self> {
        if !(length > 0.0 && length.is_finite()) {
            return Err(EnvelopeError::config(format!("field length must be positive, got {length}")));
        }
        if samples.len() < 2 {
            return Err(EnvelopeError::config("field profile needs at least two samples"));
        }
        let n = samples.len();
        let positions = (0..n).map(|i| length * i as f64 / (n - 1) as f64).collect();
        Self::new(positions, samples)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false: a profile holds at least two samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Distance between neighbouring samples.
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Distance from the first to the last sample.
    pub fn length(&self) -> f64 {
        self.spacing * (self.len() - 1) as f64
    }

    /// Sample positions.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Sample values.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Bounds-checked sample access: indices outside `[0, N)` read as zero.
    #[inline(always)]
    pub fn sample(&self, index: isize) -> f64 {
        if index < 0 {
            return 0.0;
        }
        self.samples.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Central-difference derivative of the shape at sample `index`.
    ///
    /// Neighbours outside the profile read as zero.
    #[inline(always)]
    pub fn derivative(&self, index: isize) -> f64 {
        (self.sample(index + 1) - self.sample(index - 1)) / (2.0 * self.spacing)
    }

    /// Nearest sample to a distance `z` from the first sample, clamped to the profile.
    pub fn index_of(&self, z: f64) -> usize {
        let raw = (z / self.spacing).round();
        if raw <= 0.0 || raw.is_nan() {
            0
        } else {
            (raw as usize).min(self.len() - 1)
        }
    }
}

/// RF drive of a cavity or gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RfDrive {
    /// RF frequency (Hz).
    pub frequency: f64,
    /// Field amplitude scaling the profile's shape values (V/m).
    pub amplitude: f64,
    /// RF phase of the synchronous particle at the element entrance (rad).
    pub entry_phase: f64,
}

impl RfDrive {
    /// Validated drive.
    pub fn new(frequency: f64, amplitude: f64, entry_phase: f64) -> Result<Self> {
        if !(frequency > 0.0 && frequency.is_finite()) {
            return Err(EnvelopeError::config(format!("RF frequency must be positive, got {frequency}")));
        }
        if !amplitude.is_finite() || !entry_phase.is_finite() {
            return Err(EnvelopeError::config("RF amplitude and phase must be finite"));
        }
        Ok(Self { frequency, amplitude, entry_phase })
    }

    /// Angular frequency (rad/s).
    pub fn omega(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.frequency
    }
}

/// Transit-time factor fit `T(β) = Σ cₖ βᵏ` for a gap of fixed length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtfFit {
    /// Gap length (m).
    pub length: f64,
    /// Polynomial coefficients, constant term first.
    pub coefficients: Vec<f64>,
}

impl TtfFit {
    /// Validated fit.
    pub fn new(length: f64, coefficients: Vec<f64>) -> Result<Self> {
        if !(length > 0.0 && length.is_finite()) {
            return Err(EnvelopeError::config(format!("gap length must be positive, got {length}")));
        }
        if coefficients.is_empty() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(EnvelopeError::config("transit-time fit needs finite coefficients"));
        }
        Ok(Self { length, coefficients })
    }

    /// Transit-time factor at velocity `beta`.
    pub fn factor(&self, beta: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * beta + c)
    }
}

/// How an RF element describes its axial field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldModel {
    /// Directly sampled field map.
    Sampled {
        /// The sampled shape.
        profile: FieldProfile,
    },
    /// Thin gap described by a transit-time factor fit.
    TransitTimeFit {
        /// The fit.
        fit: TtfFit,
    },
    /// `cells` copies of one cell's profile with alternating sign (π mode).
    MultiCell {
        /// Single-cell shape.
        cell: FieldProfile,
        /// Number of cells.
        cells: usize,
    },
}

impl FieldModel {
    /// Sampled-field model.
    pub fn sampled(profile: FieldProfile) -> Self {
        FieldModel::Sampled { profile }
    }

    /// Transit-time-factor model.
    pub fn transit_time(fit: TtfFit) -> Self {
        FieldModel::TransitTimeFit { fit }
    }

    /// Multi-cell model; needs at least one cell.
    pub fn multi_cell(cell: FieldProfile, cells: usize) -> Result<Self> {
        if cells == 0 {
            return Err(EnvelopeError::config("multi-cell field needs at least one cell"));
        }
        Ok(FieldModel::MultiCell { cell, cells })
    }

    /// Element length covered by the field.
    pub fn length(&self) -> f64 {
        match self {
            FieldModel::Sampled { profile } => profile.length(),
            FieldModel::TransitTimeFit { fit } => fit.length,
            FieldModel::MultiCell { cell, cells } => cell.length() * *cells as f64,
        }
    }

    /// Resolves the model to the sampled profile seen by a probe.
    ///
    /// A transit-time gap becomes the one-step profile `[T(β), 0]` over its
    /// length, so the integrator applies the whole gap as a single kick at
    /// the entrance velocity.
    pub fn profile_for(&self, probe: &Probe) -> Result<Cow<'_, FieldProfile>> {
        match self {
            FieldModel::Sampled { profile } => Ok(Cow::Borrowed(profile)),
            FieldModel::TransitTimeFit { fit } => {
                let factor = fit.factor(probe.beta());
                Ok(Cow::Owned(FieldProfile::uniform(fit.length, vec![factor, 0.0])?))
            }
            FieldModel::MultiCell { cell, cells } => {
                let m = cell.len() - 1;
                let shape = cell.samples();
                let sign = |k: usize| if k % 2 == 0 { 1.0 } else { -1.0 };
                let mut samples = Vec::with_capacity(m * cells + 1);
                for k in 0..*cells {
                    for (j, value) in shape[..m].iter().enumerate() {
                        let value = sign(k) * value;
                        if j == 0 && k > 0 {
                            // Shared boundary between cell k-1's exit and cell k's entry.
                            samples.push(0.5 * (sign(k - 1) * shape[m] + value));
                        } else {
                            samples.push(value);
                        }
                    }
                }
                samples.push(sign(cells - 1) * shape[m]);
                Ok(Cow::Owned(FieldProfile::uniform(self.length(), samples)?))
            }
        }
    }
}
