//! End-to-end reconstruction on a drift / RF gap / drift line.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use beamenv_calc::{
    BeamLine, CourantSnyderEstimator, CovarianceMatrix, Element, EnvelopeError, EnvelopeMeasurement,
    EstimatorConfig, EstimatorState, FieldModel, FieldProfile, PhasePlane, Probe, RfDrive,
    SpaceCharge, Species, Twiss, estimate_zero_current, residual_error, synthesize_measurements,
};

const POSITIONS: [f64; 4] = [0.7, 1.5, 2.5, 3.5];

fn gap_profile() -> FieldProfile {
    let shape = (0..41)
        .map(|i| (std::f64::consts::PI * i as f64 / 40.0).sin().powi(2))
        .collect();
    FieldProfile::uniform(0.02, shape).unwrap()
}

fn line() -> BeamLine {
    BeamLine::new(
        Probe::of_species(Species::Proton, 2.5e6).unwrap(),
        vec![
            Element::drift(0.48),
            Element::rf_gap(FieldModel::sampled(gap_profile()), RfDrive::new(352.21e6, 3.0e6, -1.0).unwrap()),
            Element::drift(3.5),
        ],
    )
    .unwrap()
}

fn truth() -> CovarianceMatrix {
    CovarianceMatrix::from_twiss([
        Twiss::new(0.5, 2.0, 1.0e-6).unwrap(),
        Twiss::new(-0.3, 1.5, 1.2e-6).unwrap(),
        Twiss::new(0.1, 0.8, 2.0e-6).unwrap(),
    ])
}

/// Readings from `truth()` through the space-charge line, with the second
/// reading 10% too large in every plane.
fn inconsistent_readings(line: &BeamLine) -> Vec<EnvelopeMeasurement> {
    let maps = line.maps_at(&truth(), &POSITIONS).unwrap();
    let mut readings = synthesize_measurements(&truth(), &maps, &POSITIONS).unwrap();
    readings[1].rms = readings[1].rms.map(|r| r * 1.1);
    readings
}

fn space_charge_line() -> BeamLine {
    line().with_space_charge(SpaceCharge::new(5e-9, 1e-9, 0.05).unwrap())
}

/// Truth with every Twiss parameter scaled by a random factor in `[0.8, 1.2)`.
fn perturbed(seed: u64) -> CovarianceMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let truth = truth();
    CovarianceMatrix::from_twiss(PhasePlane::ALL.map(|plane| {
        let t = truth.twiss(plane).unwrap();
        let mut jitter = || 1.0 + rng.gen_range(-0.2..0.2);
        Twiss::new(t.alpha * jitter(), t.beta * jitter(), t.emittance * jitter()).unwrap()
    }))
}

#[test]
fn zero_current_line_is_reconstructed_exactly() {
    let line = line();
    let maps = line.zero_current_maps(&POSITIONS).unwrap();
    let readings = synthesize_measurements(&truth(), &maps, &POSITIONS).unwrap();

    let sigma = estimate_zero_current(&maps, &readings).unwrap();
    assert!(sigma.relative_distance(&truth()) < 1e-6);
    assert!(residual_error(&sigma, &maps, &readings).unwrap() < 1e-8);
}

#[test]
fn space_charge_solve_recovers_beam_from_perturbed_guesses() {
    let line = space_charge_line();
    let maps = line.maps_at(&truth(), &POSITIONS).unwrap();
    let readings = synthesize_measurements(&truth(), &maps, &POSITIONS).unwrap();
    let config = EstimatorConfig { max_iterations: 200, ..EstimatorConfig::default() };

    for seed in [1, 7, 42] {
        let guess = perturbed(seed);
        assert!(guess.relative_distance(&truth()) > 1e-3);

        let mut estimator = CourantSnyderEstimator::new(line.clone(), config).unwrap();
        let sigma = estimator.estimate(&guess, &readings).unwrap();

        assert_eq!(estimator.state(), EstimatorState::Converged);
        assert!(estimator.iterations() < config.max_iterations);
        assert!(estimator.convergence_error() <= config.tolerance);
        assert!(
            sigma.relative_distance(&truth()) < 1e-6,
            "seed {seed}: distance {}",
            sigma.relative_distance(&truth())
        );
        assert!(estimator.alpha_history().iter().all(|a| *a >= config.default_alpha));

        let fresh = estimator.generator().maps_at(&sigma, &POSITIONS).unwrap();
        assert_eq!(estimator.residual_error(), residual_error(&sigma, &fresh, &readings).unwrap());
    }
}

#[test]
fn inconsistent_readings_settle_on_self_consistent_fit() {
    let line = space_charge_line();
    let readings = inconsistent_readings(&line);
    let config = EstimatorConfig { max_iterations: 200, ..EstimatorConfig::default() };

    let mut estimator = CourantSnyderEstimator::new(line.clone(), config).unwrap();
    let sigma = estimator.estimate(&perturbed(5), &readings).unwrap();
    assert_eq!(estimator.state(), EstimatorState::Converged);

    // No beam reproduces the readings, but the fit is a fixed point of the
    // least-squares observation through its own maps.
    assert!(estimator.residual_error() > 1e-4);
    let refit = estimate_zero_current(&line.maps_at(&sigma, &POSITIONS).unwrap(), &readings).unwrap();
    assert!(refit.relative_distance(&sigma) < 1e-7);
    assert!(sigma.relative_distance(&truth()) > 1e-3);
}

#[test]
fn inconsistent_readings_fail_at_iteration_cap() {
    let line = space_charge_line();
    let readings = inconsistent_readings(&line);
    let config = EstimatorConfig { max_iterations: 4, ..EstimatorConfig::default() };

    let mut estimator = CourantSnyderEstimator::new(line, config).unwrap();
    match estimator.estimate(&perturbed(5), &readings) {
        Err(EnvelopeError::ConvergenceFailure { iterations, error }) => {
            assert_eq!(iterations, config.max_iterations);
            assert!(error > config.tolerance);
        }
        other => panic!("expected convergence failure, got {other:?}"),
    }
    assert_eq!(estimator.iterations(), config.max_iterations);
    assert_eq!(estimator.state(), EstimatorState::Failed);
}

#[test]
fn solve_without_space_charge_matches_zero_current_answer() {
    let line = line();
    let maps = line.zero_current_maps(&POSITIONS).unwrap();
    let readings = synthesize_measurements(&truth(), &maps, &POSITIONS).unwrap();
    let direct = estimate_zero_current(&maps, &readings).unwrap();

    let mut estimator = CourantSnyderEstimator::new(line, EstimatorConfig::default()).unwrap();
    let sigma = estimator.estimate(&perturbed(3), &readings).unwrap();

    assert_eq!(estimator.state(), EstimatorState::Converged);
    assert!(sigma.relative_distance(&direct) < 1e-8);
}

#[test]
fn readings_must_lie_on_the_line() {
    let line = line();
    let readings = synthesize_measurements(
        &truth(),
        &line.zero_current_maps(&POSITIONS).unwrap(),
        &[0.7, 1.5, 2.5, 40.0],
    )
    .unwrap();

    let mut estimator = CourantSnyderEstimator::new(line, EstimatorConfig::default()).unwrap();
    assert!(estimator.estimate(&truth(), &readings).is_err());
}
