//! Transfer maps of sampled RF fields.
//!
//! Building a map is a two-pass affair. [`IntegrationContext::precompute`]
//! steps the synchronous particle through every field sample once, recording
//! its RF phase and kinetic energy at each sample. The context then answers
//! any number of sub-range queries ([`IntegrationContext::transfer_map`],
//! [`IntegrationContext::energy_gain`]) from those arrays without
//! re-integrating.
//!
//! A context belongs to exactly one entry condition. A probe arriving with a
//! different energy or phase needs a fresh context; [`IntegrationContext::matches_entry`]
//! tells the two apart.
//!
//! The maps carry only the field's action on the beam. Drift transport over
//! the same length is the caller's business ([`PhaseMatrix::drift`]), so an
//! empty field maps to the identity.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::{SPEED_OF_LIGHT, beta_from_gamma, gamma_from_energy};
use crate::field::{FieldProfile, RfDrive};
use crate::matrix::Matrix2;
use crate::ode::{SplitStepIntegrator, SplitStepSystem};
use crate::phase::PhaseMatrix;
use crate::probe::Probe;

/// Per-sample diagonal term of the longitudinal generator.
///
/// Both variants depend only on the normalized momentum `βγ` before and after
/// the sample, so sub-range maps compose exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LongitudinalFormula {
    /// `ln((βγ)ᵢ / (βγ)ᵢ₊₁)`: the composed block's determinant is exactly
    /// `(βγ)_start / (βγ)_end`.
    #[default]
    LogRatio,
    /// Second-order expansion `-x + x²/2` of the log ratio, with
    /// `x = ((βγ)ᵢ₊₁ - (βγ)ᵢ) / (βγ)ᵢ`.
    Quadratic,
}

impl LongitudinalFormula {
    /// Diagonal generator term for a step from `bg_start` to `bg_end`.
    #[inline(always)]
    pub fn diagonal(&self, bg_start: f64, bg_end: f64) -> f64 {
        match self {
            LongitudinalFormula::LogRatio => (bg_start / bg_end).ln(),
            LongitudinalFormula::Quadratic => {
                let x = (bg_end - bg_start) / bg_start;
                -x + 0.5 * x * x
            }
        }
    }
}

/// Synchronous particle stepped through the samples: state is `(phase, energy)`.
struct SynchronousParticle<'a> {
    profile: &'a FieldProfile,
    /// Charge times field amplitude (eV/m per unit shape).
    k0: f64,
    omega: f64,
    rest_energy: f64,
}

impl SplitStepSystem for SynchronousParticle<'_> {
    type State = (f64, f64);

    fn kick(&self, index: usize, state: &mut (f64, f64), step: f64) {
        let field = self.profile.sample(index as isize);
        state.1 += self.k0 * field * state.0.cos() * step;
    }

    fn drift(&self, _index: usize, state: &mut (f64, f64), step: f64) {
        let beta = beta_from_gamma(gamma_from_energy(state.1, self.rest_energy));
        state.0 += self.omega * step / (beta * SPEED_OF_LIGHT);
    }
}

/// Phase and energy of the synchronous particle at every field sample, for
/// one entry condition.
#[derive(Debug, Clone)]
pub struct IntegrationContext<'a> {
    profile: &'a FieldProfile,
    drive: RfDrive,
    probe: Probe,
    formula: LongitudinalFormula,
    phase: Vec<f64>,
    energy: Vec<f64>,
}

impl<'a> IntegrationContext<'a> {
    /// Runs the phase/energy pass for a probe entering the element with
    /// `probe`'s energy at `drive.entry_phase`.
    pub fn precompute(
        profile: &'a FieldProfile,
        drive: RfDrive,
        probe: &Probe,
        formula: LongitudinalFormula,
    ) -> Self {
        let system = SynchronousParticle {
            profile,
            k0: probe.charge * drive.amplitude,
            omega: drive.omega(),
            rest_energy: probe.rest_energy,
        };
        let states = SplitStepIntegrator::integrate(
            &system,
            (drive.entry_phase, probe.kinetic_energy),
            profile.len(),
            profile.spacing(),
        );
        let (phase, energy): (Vec<f64>, Vec<f64>) = states.into_iter().unzip();

        trace!(
            samples = profile.len(),
            entry_energy = probe.kinetic_energy,
            exit_energy = energy[energy.len() - 1],
            "precomputed integration context"
        );

        Self { profile, drive, probe: *probe, formula, phase, energy }
    }

    /// Whether this context was built for the given entry condition.
    pub fn matches_entry(&self, probe: &Probe, drive: &RfDrive) -> bool {
        self.probe == *probe && self.drive == *drive
    }

    /// Field profile the context integrates.
    pub fn profile(&self) -> &FieldProfile {
        self.profile
    }

    /// Longitudinal diagonal convention in use.
    pub fn formula(&self) -> LongitudinalFormula {
        self.formula
    }

    /// RF phase at each sample.
    pub fn phases(&self) -> &[f64] {
        &self.phase
    }

    /// Kinetic energy at each sample.
    pub fn energies(&self) -> &[f64] {
        &self.energy
    }

    /// Kinetic energy at the sample nearest `position`.
    pub fn energy_at(&self, position: f64) -> f64 {
        self.energy[self.profile.index_of(position)]
    }

    /// Energy gained between two positions, read from the precomputed table.
    pub fn energy_gain(&self, from: f64, to: f64) -> f64 {
        self.energy_at(to) - self.energy_at(from)
    }

    /// Probe state after traversing the whole element.
    pub fn exit_probe(&self) -> Probe {
        self.probe.with_kinetic_energy(self.energy[self.energy.len() - 1])
    }

    fn beta_gamma(&self, energy: f64) -> (f64, f64) {
        let gamma = gamma_from_energy(energy, self.probe.rest_energy);
        (beta_from_gamma(gamma), gamma)
    }

    /// Local generators `[transverse, longitudinal]` of the step at sample `i`.
    ///
    /// Requires `i + 1 < N`.
    fn generators(&self, i: usize) -> [Matrix2; 2] {
        let dz = self.profile.spacing();
        let index = i as isize;
        let field = self.drive.amplitude * self.profile.sample(index);
        let slope = self.drive.amplitude * self.profile.derivative(index);
        let phi = self.phase[i];
        let (sin_phi, cos_phi) = phi.sin_cos();

        let q = self.probe.charge;
        let rest = self.probe.rest_energy;
        let omega = self.drive.omega();
        let (beta, gamma) = self.beta_gamma(self.energy[i]);
        let (beta_next, gamma_next) = self.beta_gamma(self.energy[i + 1]);

        // Adiabatic damping γ'/(β²γ) and the linear radial force of the RF field.
        let gamma_prime = q * field * cos_phi / rest;
        let damping = gamma_prime / (beta * beta * gamma);
        let k_transverse = q / (2.0 * rest * beta * beta * gamma)
            * (-slope * cos_phi + omega * beta / SPEED_OF_LIGHT * field * sin_phi);
        let transverse = Matrix2::new(0.0, 0.0, k_transverse * dz, -damping * dz);

        let k_longitudinal =
            q * omega * field * sin_phi / (rest * beta.powi(3) * gamma * SPEED_OF_LIGHT);
        let diagonal = self.formula.diagonal(beta * gamma, beta_next * gamma_next);
        let longitudinal = Matrix2::new(0.0, 0.0, k_longitudinal * dz, diagonal);

        [transverse, longitudinal]
    }

    /// Transfer map of the samples `[i0, i1)`.
    ///
    /// `i1` is clamped to the last sample; an empty range gives the identity.
    pub fn transfer_range(&self, i0: usize, i1: usize) -> PhaseMatrix {
        let i1 = i1.min(self.profile.len() - 1);
        let mut transverse = Matrix2::identity();
        let mut longitudinal = Matrix2::identity();
        for i in i0..i1 {
            let [t, l] = self.generators(i);
            transverse = t.exp().mul(&transverse);
            longitudinal = l.exp().mul(&longitudinal);
        }
        PhaseMatrix::from_blocks([transverse, transverse, longitudinal])
    }

    /// Transfer map for `length` meters starting `position` meters into the element.
    ///
    /// Positions snap to the nearest sample.
    pub fn transfer_map(&self, position: f64, length: f64) -> PhaseMatrix {
        let i0 = self.profile.index_of(position);
        let i1 = self.profile.index_of(position + length);
        self.transfer_range(i0, i1)
    }

    /// Transfer map of the whole element.
    pub fn full_map(&self) -> PhaseMatrix {
        self.transfer_range(0, self.profile.len() - 1)
    }

    /// Full transport over the samples `[i0, i1)`, drifts included.
    ///
    /// Every step is a half drift, the step's field kick and a half drift,
    /// with the longitudinal slip taken at the energy on each side of the
    /// kick. Splitting a range at any sample and composing the pieces gives
    /// the same map.
    pub fn transport_range(&self, i0: usize, i1: usize) -> PhaseMatrix {
        let i1 = i1.min(self.profile.len() - 1);
        let half = 0.5 * self.profile.spacing();
        let free = Matrix2::new(1.0, half, 0.0, 1.0);
        let mut transverse = Matrix2::identity();
        let mut longitudinal = Matrix2::identity();
        for i in i0..i1 {
            let [t, l] = self.generators(i);
            let (_, gamma_in) = self.beta_gamma(self.energy[i]);
            let (_, gamma_out) = self.beta_gamma(self.energy[i + 1]);
            let slip_in = Matrix2::new(1.0, half / (gamma_in * gamma_in), 0.0, 1.0);
            let slip_out = Matrix2::new(1.0, half / (gamma_out * gamma_out), 0.0, 1.0);
            transverse = free.mul(&t.exp()).mul(&free).mul(&transverse);
            longitudinal = slip_out.mul(&l.exp()).mul(&slip_in).mul(&longitudinal);
        }
        PhaseMatrix::from_blocks([transverse, transverse, longitudinal])
    }

    /// Full transport between two positions inside the element, snapped to samples.
    pub fn transport_between(&self, from: f64, to: f64) -> PhaseMatrix {
        self.transport_range(self.profile.index_of(from), self.profile.index_of(to))
    }
}
