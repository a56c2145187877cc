//! A straight beam line of drifts and RF gaps, as a transfer-map generator.
//!
//! [`BeamLine::maps_at`] walks the line once per call, splitting elements at
//! the requested positions. Every RF gap gets a fresh [`IntegrationContext`]
//! for the probe energy it actually sees, and the probe is advanced by the
//! gap's energy gain before the next element. Inside a gap, positions snap
//! to the nearest field sample, and the map to a position does not depend on
//! which other positions were requested.
//!
//! With [`SpaceCharge`] enabled, drifts are cut into slices with a linear
//! space-charge kick in the middle of each slice, on a grid fixed per element. The kick strength depends on
//! the beam size at the slice, which is where the trial covariance of the
//! fixed-point estimator enters.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::covariance::CovarianceMatrix;
use crate::error::{EnvelopeError, Result};
use crate::estimator::TransferMapGenerator;
use crate::field::{FieldModel, RfDrive};
use crate::matrix::Matrix2;
use crate::phase::{PhaseMatrix, PhasePlane};
use crate::probe::Probe;
use crate::transfer::{IntegrationContext, LongitudinalFormula};

/// Slack allowed on positions at the very end of the line.
const POSITION_SLACK: f64 = 1e-9;

/// One element of a [`BeamLine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Element {
    /// Field-free drift.
    Drift {
        /// Length (m).
        length: f64,
    },
    /// RF gap or cavity.
    RfGap {
        /// Axial field description.
        model: FieldModel,
        /// RF drive.
        drive: RfDrive,
    },
}

impl Element {
    /// Drift of `length` meters.
    pub fn drift(length: f64) -> Self {
        Element::Drift { length }
    }

    /// RF gap.
    pub fn rf_gap(model: FieldModel, drive: RfDrive) -> Self {
        Element::RfGap { model, drive }
    }

    /// Axial length.
    pub fn length(&self) -> f64 {
        match self {
            Element::Drift { length } => *length,
            Element::RfGap { model, .. } => model.length(),
        }
    }
}

/// Linear space-charge model applied in drifts.
///
/// The defocusing strength follows the uniform-ellipse result
/// `k_x = K / (2 σx (σx + σy))`, `k_y = K / (2 σy (σx + σy))` and
/// `k_z = K_l / σz²`, with `σ` the local RMS sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpaceCharge {
    /// Transverse generalized perveance `K`.
    pub perveance: f64,
    /// Longitudinal perveance `K_l` (m).
    pub longitudinal_perveance: f64,
    /// Maximum slice length (m).
    pub slice_length: f64,
}

impl SpaceCharge {
    /// Validated model.
    pub fn new(perveance: f64, longitudinal_perveance: f64, slice_length: f64) -> Result<Self> {
        if !(perveance >= 0.0 && perveance.is_finite())
            || !(longitudinal_perveance >= 0.0 && longitudinal_perveance.is_finite())
        {
            return Err(EnvelopeError::config("perveances must be finite and non-negative"));
        }
        if !(slice_length > 0.0 && slice_length.is_finite()) {
            return Err(EnvelopeError::config(format!(
                "space-charge slice length must be positive, got {slice_length}"
            )));
        }
        Ok(Self { perveance, longitudinal_perveance, slice_length })
    }

    /// Thin kick of integrated length `length` for a beam `local`.
    fn kick(&self, local: &CovarianceMatrix, length: f64) -> Result<PhaseMatrix> {
        let [sx, sy, sz] = PhasePlane::ALL.map(|plane| local.get(plane.offset(), plane.offset()).sqrt());
        for (plane, size) in PhasePlane::ALL.iter().zip([sx, sy, sz]) {
            if !(size > 0.0 && size.is_finite()) {
                return Err(EnvelopeError::numeric(format!(
                    "non-physical {plane} beam size {size} in space-charge kick"
                )));
            }
        }
        let kx = self.perveance / (2.0 * sx * (sx + sy));
        let ky = self.perveance / (2.0 * sy * (sx + sy));
        let kz = self.longitudinal_perveance / (sz * sz);
        Ok(PhaseMatrix::from_blocks([
            Matrix2::new(1.0, 0.0, kx * length, 1.0),
            Matrix2::new(1.0, 0.0, ky * length, 1.0),
            Matrix2::new(1.0, 0.0, kz * length, 1.0),
        ]))
    }
}

/// Ordered elements traversed by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamLine {
    probe: Probe,
    elements: Vec<Element>,
    #[serde(default)]
    space_charge: Option<SpaceCharge>,
    #[serde(default)]
    formula: LongitudinalFormula,
}

impl BeamLine {
    /// Line without space charge; element lengths must be positive.
    pub fn new(probe: Probe, elements: Vec<Element>) -> Result<Self> {
        if elements.is_empty() {
            return Err(EnvelopeError::config("beam line has no elements"));
        }
        for (i, element) in elements.iter().enumerate() {
            let length = element.length();
            if !(length > 0.0 && length.is_finite()) {
                return Err(EnvelopeError::config(format!(
                    "element {i} has non-positive length {length}"
                )));
            }
        }
        Ok(Self { probe, elements, space_charge: None, formula: LongitudinalFormula::default() })
    }

    /// Enables linear space charge in drifts.
    pub fn with_space_charge(mut self, space_charge: SpaceCharge) -> Self {
        self.space_charge = Some(space_charge);
        self
    }

    /// Selects the longitudinal diagonal convention for RF gaps.
    pub fn with_formula(mut self, formula: LongitudinalFormula) -> Self {
        self.formula = formula;
        self
    }

    /// Probe at the line entrance.
    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    /// Elements in beam order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Space-charge model, if any.
    pub fn space_charge(&self) -> Option<&SpaceCharge> {
        self.space_charge.as_ref()
    }

    /// Total length.
    pub fn length(&self) -> f64 {
        self.elements.iter().map(Element::length).sum()
    }

    /// Maps from the entrance to each position, for the beam `sigma` at the entrance.
    ///
    /// Positions must be finite, non-decreasing and inside the line.
    pub fn maps_at(&self, sigma: &CovarianceMatrix, positions: &[f64]) -> Result<Vec<PhaseMatrix>> {
        self.walk(Some(sigma), positions)
    }

    /// Maps with space charge switched off.
    pub fn zero_current_maps(&self, positions: &[f64]) -> Result<Vec<PhaseMatrix>> {
        self.walk(None, positions)
    }

    /// Probe state at the end of the line.
    pub fn exit_probe(&self) -> Result<Probe> {
        let mut probe = self.probe;
        for element in &self.elements {
            if let Element::RfGap { model, drive } = element {
                let profile = model.profile_for(&probe)?;
                probe = IntegrationContext::precompute(&profile, *drive, &probe, self.formula).exit_probe();
            }
        }
        Ok(probe)
    }

    fn check_positions(&self, positions: &[f64]) -> Result<()> {
        let total = self.length();
        let mut last = 0.0;
        for &p in positions {
            if !p.is_finite() || p < 0.0 || p > total + POSITION_SLACK {
                return Err(EnvelopeError::config(format!(
                    "position {p} lies outside the beam line [0, {total}]"
                )));
            }
            if p < last {
                return Err(EnvelopeError::config("positions must be in ascending order"));
            }
            last = p;
        }
        Ok(())
    }

    fn walk(&self, sigma: Option<&CovarianceMatrix>, positions: &[f64]) -> Result<Vec<PhaseMatrix>> {
        self.check_positions(positions)?;
        let space_charge = match (sigma, &self.space_charge) {
            (Some(sigma), Some(sc)) => Some((sigma, sc)),
            _ => None,
        };

        let mut maps = Vec::with_capacity(positions.len());
        let mut acc = PhaseMatrix::identity();
        let mut probe = self.probe;
        let mut start = 0.0;
        let mut next = 0;

        for (k, element) in self.elements.iter().enumerate() {
            let length = element.length();
            let end = start + length;
            let last = k + 1 == self.elements.len();
            let mut stops = Vec::new();
            while next < positions.len() && (last || positions[next] <= end) {
                stops.push(positions[next] - start);
                next += 1;
            }

            match element {
                Element::Drift { .. } => {
                    let mut local = 0.0;
                    for stop in stops {
                        acc = drift(&acc, local, stop, length, &probe, space_charge)?;
                        local = stop;
                        maps.push(acc.clone());
                    }
                    acc = drift(&acc, local, length, length, &probe, space_charge)?;
                }
                Element::RfGap { model, drive } => {
                    let profile = model.profile_for(&probe)?;
                    let ctx = IntegrationContext::precompute(&profile, *drive, &probe, self.formula);
                    let mut local = 0.0;
                    for stop in stops {
                        acc = &ctx.transport_between(local, stop) * &acc;
                        local = stop;
                        maps.push(acc.clone());
                    }
                    acc = &ctx.transport_between(local, length) * &acc;
                    probe = ctx.exit_probe();
                    trace!(energy = probe.kinetic_energy, "probe advanced through RF gap");
                }
            }
            start = end;
        }
        Ok(maps)
    }
}

/// Drift over `(from, to]` of a drift element of `element_length`, after `acc`.
///
/// Space-charge kicks sit at the centres of the element's slices, so the
/// kicks a segment applies depend only on its end points.
fn drift(
    acc: &PhaseMatrix,
    from: f64,
    to: f64,
    element_length: f64,
    probe: &Probe,
    space_charge: Option<(&CovarianceMatrix, &SpaceCharge)>,
) -> Result<PhaseMatrix> {
    if to <= from {
        return Ok(acc.clone());
    }
    let gamma = probe.gamma();
    let Some((sigma, sc)) = space_charge else {
        return Ok(&PhaseMatrix::drift(to - from, gamma) * acc);
    };

    let slices = (element_length / sc.slice_length).ceil().max(1.0) as usize;
    let h = element_length / slices as f64;
    // Number of kicks at or before `z`.
    let kicks_upto = |z: f64| ((z / h + 0.5).floor().max(0.0) as usize).min(slices);

    let mut acc = acc.clone();
    let mut z = from;
    for j in kicks_upto(from)..kicks_upto(to) {
        let kick_at = (j as f64 + 0.5) * h;
        acc = &PhaseMatrix::drift(kick_at - z, gamma) * &acc;
        let local = sigma.propagate(&acc);
        acc = &sc.kick(&local, h)? * &acc;
        z = kick_at;
    }
    Ok(&PhaseMatrix::drift(to - z, gamma) * &acc)
}

impl TransferMapGenerator for BeamLine {
    fn transfer_maps(&mut self, trial: &CovarianceMatrix, positions: &[f64]) -> Result<Vec<PhaseMatrix>> {
        self.maps_at(trial, positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::Species;
    use crate::covariance::Twiss;
    use crate::field::{FieldProfile, TtfFit};
    use approx::assert_relative_eq;

    fn proton() -> Probe {
        Probe::of_species(Species::Proton, 2.5e6).unwrap()
    }

    fn beam() -> CovarianceMatrix {
        CovarianceMatrix::from_twiss([
            Twiss::new(0.5, 2.0, 1.0e-6).unwrap(),
            Twiss::new(-0.3, 1.5, 1.2e-6).unwrap(),
            Twiss::new(0.1, 0.8, 2.0e-6).unwrap(),
        ])
    }

    fn gap() -> Element {
        let samples = (0..41)
            .map(|i| (std::f64::consts::PI * i as f64 / 40.0).sin().powi(2))
            .collect();
        let profile = FieldProfile::uniform(0.1, samples).unwrap();
        Element::rf_gap(FieldModel::sampled(profile), RfDrive::new(50.0e6, 2.0e6, -0.4).unwrap())
    }

    #[test]
    fn test_drift_line_matches_drift_matrices() {
        let line = BeamLine::new(proton(), vec![Element::drift(1.0), Element::drift(2.0)]).unwrap();
        let maps = line.maps_at(&beam(), &[0.0, 0.5, 1.0, 2.5, 3.0]).unwrap();
        assert_eq!(maps.len(), 5);
        let gamma = proton().gamma();
        for (map, p) in maps.iter().zip([0.0, 0.5, 1.0, 2.5, 3.0]) {
            assert!(map.approx_eq(&PhaseMatrix::drift(p, gamma), 1e-12), "position {p}");
        }
        assert_relative_eq!(line.length(), 3.0);
    }

    #[test]
    fn test_gap_advances_probe() {
        let line = BeamLine::new(proton(), vec![Element::drift(0.2), gap(), Element::drift(0.5)]).unwrap();
        let exit = line.exit_probe().unwrap();
        assert!(exit.kinetic_energy > proton().kinetic_energy);
        let maps = line.zero_current_maps(&[0.25, 0.8]).unwrap();
        // Acceleration shrinks the longitudinal block's determinant.
        let det = maps[1].block(PhasePlane::Longitudinal).det();
        assert!(det < 1.0);
        assert!(maps[1].is_homogeneous(0.0));
    }

    #[test]
    fn test_map_independent_of_other_stops() {
        let sc = SpaceCharge::new(1e-8, 1e-9, 0.05).unwrap();
        let line = BeamLine::new(proton(), vec![Element::drift(0.2), gap(), Element::drift(0.5)]).unwrap();
        let charged = line.clone().with_space_charge(sc);
        let alone = line.zero_current_maps(&[0.8]).unwrap();
        let alone_charged = charged.maps_at(&beam(), &[0.8]).unwrap();
        for q in [0.1, 0.175, 0.2013, 0.25, 0.2513, 0.2987, 0.425, 0.55] {
            let split = line.zero_current_maps(&[q, 0.8]).unwrap();
            assert!(split[1].approx_eq(&alone[0], 1e-12), "stop at {q}: {:e}", split[1].max_abs_diff(&alone[0]));
            let split = charged.maps_at(&beam(), &[q, 0.8]).unwrap();
            assert!(split[1].approx_eq(&alone_charged[0], 1e-12), "charged stop at {q}");
        }
    }

    #[test]
    fn test_positions_at_element_boundaries() {
        let line = BeamLine::new(proton(), vec![Element::drift(0.2), gap(), Element::drift(0.5)]).unwrap();
        let at_boundary = line.zero_current_maps(&[0.2, 0.3]).unwrap();
        let past = line.zero_current_maps(&[0.2, 0.3, 0.3]).unwrap();
        assert!(at_boundary[0].approx_eq(&PhaseMatrix::drift(0.2, proton().gamma()), 1e-12));
        assert_eq!(at_boundary[1], past[1]);
        assert_eq!(past[1], past[2]);
    }

    #[test]
    fn test_space_charge_defocuses() {
        let sc = SpaceCharge::new(1e-6, 0.0, 0.05).unwrap();
        let line = BeamLine::new(proton(), vec![Element::drift(2.0)]).unwrap();
        let plain = line.maps_at(&beam(), &[2.0]).unwrap();
        let charged = line.clone().with_space_charge(sc).maps_at(&beam(), &[2.0]).unwrap();
        let size = |maps: &[PhaseMatrix]| beam().propagate(&maps[0]).rms_size(PhasePlane::Horizontal);
        assert!(size(&charged) > size(&plain));
        // Without perveance the longitudinal plane is an ordinary drift.
        assert_relative_eq!(
            charged[0].block(PhasePlane::Longitudinal).m[0][1],
            plain[0].block(PhasePlane::Longitudinal).m[0][1],
            max_relative = 1e-12
        );
        // Zero-current maps ignore the model.
        let zero = line.with_space_charge(sc).zero_current_maps(&[2.0]).unwrap();
        assert!(zero[0].approx_eq(&plain[0], 0.0));
    }

    #[test]
    fn test_space_charge_rejects_collapsed_beam() {
        let sc = SpaceCharge::new(1e-6, 1e-6, 0.1).unwrap();
        let line = BeamLine::new(proton(), vec![Element::drift(1.0)]).unwrap().with_space_charge(sc);
        let err = line.maps_at(&CovarianceMatrix::zero(), &[1.0]).unwrap_err();
        assert!(err.is_numeric());
    }

    #[test]
    fn test_position_validation() {
        let line = BeamLine::new(proton(), vec![Element::drift(1.0)]).unwrap();
        assert!(line.maps_at(&beam(), &[0.5, 0.2]).unwrap_err().is_configuration());
        assert!(line.maps_at(&beam(), &[1.5]).is_err());
        assert!(line.maps_at(&beam(), &[-0.1]).is_err());
        assert!(line.maps_at(&beam(), &[0.5, 0.5, 0.5]).is_ok());
        assert!(BeamLine::new(proton(), vec![]).is_err());
        assert!(BeamLine::new(proton(), vec![Element::drift(0.0)]).is_err());
        assert!(SpaceCharge::new(-1.0, 0.0, 0.1).is_err());
        assert!(SpaceCharge::new(1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_transit_time_gap_in_line() {
        let fit = TtfFit::new(0.04, vec![0.8]).unwrap();
        let drive = RfDrive::new(50.0e6, 1.0e6, 0.0).unwrap();
        let line = BeamLine::new(proton(), vec![Element::rf_gap(FieldModel::transit_time(fit), drive)]).unwrap();
        let exit = line.exit_probe().unwrap();
        assert_relative_eq!(exit.kinetic_energy - 2.5e6, 1.0e6 * 0.8 * 0.04, max_relative = 1e-12);
    }

    #[test]
    fn test_line_serde() {
        let line = BeamLine::new(proton(), vec![Element::drift(0.3), gap()])
            .unwrap()
            .with_space_charge(SpaceCharge::new(1e-8, 0.0, 0.1).unwrap());
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.contains("rf-gap"));
        assert!(json.contains("log-ratio"));
        let back: BeamLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back.elements().len(), 2);
        assert_relative_eq!(back.length(), line.length(), max_relative = 1e-12);
        assert_eq!(back.space_charge(), line.space_charge());
    }
}
