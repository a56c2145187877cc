//! Probe state: the synchronous particle the envelope is referenced to.

use serde::{Deserialize, Serialize};

use crate::constants::{Species, beta_from_gamma, gamma_from_energy};
use crate::error::{EnvelopeError, Result};

/// Kinetic energy, rest energy and charge of the reference particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    /// Kinetic energy (eV).
    pub kinetic_energy: f64,
    /// Rest energy (eV).
    pub rest_energy: f64,
    /// Charge in units of the elementary charge.
    pub charge: f64,
}

impl Probe {
    /// Validated probe.
    pub fn new(kinetic_energy: f64, rest_energy: f64, charge: f64) -> Result<Self> {
        if !(kinetic_energy > 0.0 && kinetic_energy.is_finite()) {
            return Err(EnvelopeError::config(format!(
                "probe kinetic energy must be positive, got {kinetic_energy}"
            )));
        }
        if !(rest_energy > 0.0 && rest_energy.is_finite()) {
            return Err(EnvelopeError::config(format!(
                "probe rest energy must be positive, got {rest_energy}"
            )));
        }
        if !charge.is_finite() {
            return Err(EnvelopeError::config("probe charge must be finite"));
        }
        Ok(Self { kinetic_energy, rest_energy, charge })
    }

    /// Probe of a known species.
    pub fn of_species(species: Species, kinetic_energy: f64) -> Result<Self> {
        Self::new(kinetic_energy, species.rest_energy(), species.charge())
    }

    /// Lorentz factor.
    pub fn gamma(&self) -> f64 {
        gamma_from_energy(self.kinetic_energy, self.rest_energy)
    }

    /// Velocity in units of `c`.
    pub fn beta(&self) -> f64 {
        beta_from_gamma(self.gamma())
    }

    /// Normalized momentum `βγ`.
    pub fn beta_gamma(&self) -> f64 {
        self.beta() * self.gamma()
    }

    /// Same particle at another kinetic energy.
    pub fn with_kinetic_energy(&self, kinetic_energy: f64) -> Self {
        Self { kinetic_energy, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_probe_factors() {
        let probe = Probe::of_species(Species::Proton, 2.5e6).unwrap();
        assert_relative_eq!(probe.gamma(), 1.0 + 2.5e6 / probe.rest_energy);
        assert!(probe.beta() > 0.07 && probe.beta() < 0.08);
        assert_relative_eq!(probe.beta_gamma(), probe.beta() * probe.gamma());
    }

    #[test]
    fn test_probe_validation() {
        assert!(Probe::new(0.0, 1.0, 1.0).unwrap_err().is_configuration());
        assert!(Probe::new(1.0, -1.0, 1.0).is_err());
        assert!(Probe::new(1.0, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_with_kinetic_energy() {
        let probe = Probe::of_species(Species::HMinus, 3.0e6).unwrap();
        let faster = probe.with_kinetic_energy(4.0e6);
        assert_eq!(faster.rest_energy, probe.rest_energy);
        assert!(faster.beta() > probe.beta());
    }
}
