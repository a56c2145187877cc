//! Physical constants and particle species.
//!
//! Energies are in electron-volts, lengths in meters, frequencies in hertz and
//! field amplitudes in volts per meter throughout the crate, so a charge in
//! units of the elementary charge times a field in V/m gives eV per meter
//! directly.

use serde::{Deserialize, Serialize};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Proton rest energy (eV).
pub const PROTON_REST_ENERGY: f64 = 938.272_088_16e6;

/// Electron rest energy (eV).
pub const ELECTRON_REST_ENERGY: f64 = 0.510_998_950_00e6;

/// H⁻ ion rest energy (eV): proton plus two electrons less binding.
pub const H_MINUS_REST_ENERGY: f64 = 939.294_0e6;

/// Particle species with a known rest energy and charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Species {
    /// Proton, charge +1.
    Proton,
    /// Negative hydrogen ion, charge -1.
    HMinus,
    /// Electron, charge -1.
    Electron,
}

impl Species {
    /// Rest energy (eV).
    pub const fn rest_energy(&self) -> f64 {
        match self {
            Species::Proton => PROTON_REST_ENERGY,
            Species::HMinus => H_MINUS_REST_ENERGY,
            Species::Electron => ELECTRON_REST_ENERGY,
        }
    }

    /// Charge in units of the elementary charge.
    pub const fn charge(&self) -> f64 {
        match self {
            Species::Proton => 1.0,
            Species::HMinus | Species::Electron => -1.0,
        }
    }
}

/// Lorentz factor for a kinetic energy `w` and rest energy `rest`.
#[inline(always)]
pub fn gamma_from_energy(w: f64, rest: f64) -> f64 {
    1.0 + w / rest
}

/// Velocity in units of `c` for a Lorentz factor `gamma`.
#[inline(always)]
pub fn beta_from_gamma(gamma: f64) -> f64 {
    (1.0 - 1.0 / (gamma * gamma)).max(0.0).sqrt()
}
