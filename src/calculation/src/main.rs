/// Example program demonstrating envelope reconstruction on a synthetic line.
///
/// A known beam is pushed through drift, RF gap and drift with weak space
/// charge to produce wire-scanner readings; the estimator then recovers the
/// beam from a randomly perturbed guess.
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use beamenv_calc::config::SolverConfig;
use beamenv_calc::constants::Species;
use beamenv_calc::covariance::{CovarianceMatrix, Twiss};
use beamenv_calc::estimator::{CourantSnyderEstimator, estimate_zero_current};
use beamenv_calc::field::{FieldModel, FieldProfile, RfDrive};
use beamenv_calc::lattice::{BeamLine, Element, SpaceCharge};
use beamenv_calc::logging::init_logging;
use beamenv_calc::metrics::{compare_envelopes, synthesize_measurements};
use beamenv_calc::phase::PhasePlane;
use beamenv_calc::probe::Probe;
use beamenv_calc::transfer::IntegrationContext;

const POSITIONS: [f64; 4] = [0.7, 1.5, 2.5, 3.5];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SolverConfig::default();
    init_logging(&config.logging);

    println!("===================================================");
    println!("Beam Envelope Reconstruction Demo");
    println!("===================================================");
    println!();

    let probe = Probe::of_species(Species::Proton, 2.5e6)?;
    println!("Probe:");
    println!("  Kinetic energy = {:.3} MeV", probe.kinetic_energy / 1e6);
    println!("  beta           = {:.5}", probe.beta());
    println!("  gamma          = {:.5}", probe.gamma());
    println!();

    let gap = gap_profile(41, 0.02)?;
    let drive = RfDrive::new(352.21e6, 3.0e6, -1.0)?;
    demo_integrator(&gap, drive, &probe);
    println!();

    let line = BeamLine::new(
        probe,
        vec![
            Element::drift(0.48),
            Element::rf_gap(FieldModel::sampled(gap), drive),
            Element::drift(3.5),
        ],
    )?
    .with_formula(config.longitudinal)
    .with_space_charge(SpaceCharge::new(5e-9, 1e-9, 0.05)?);

    let truth = CovarianceMatrix::from_twiss([
        Twiss::new(0.5, 2.0, 1.0e-6)?,
        Twiss::new(-0.3, 1.5, 1.2e-6)?,
        Twiss::new(0.1, 0.8, 2.0e-6)?,
    ]);
    let maps = line.maps_at(&truth, &POSITIONS)?;
    let readings = synthesize_measurements(&truth, &maps, &POSITIONS)?;

    println!("Synthetic readings:");
    for r in &readings {
        println!(
            "  {:<4} z = {:.2} m   sigma = ({:.4}, {:.4}, {:.4}) mm",
            r.location,
            r.position,
            r.rms[0] * 1e3,
            r.rms[1] * 1e3,
            r.rms[2] * 1e3
        );
    }
    println!();

    let zero_current = estimate_zero_current(&line.zero_current_maps(&POSITIONS)?, &readings)?;
    println!(
        "Zero-current reconstruction error: {:.3e}",
        zero_current.relative_distance(&truth)
    );

    // Perturb the truth by up to ±20% per Twiss parameter.
    let mut rng = StdRng::seed_from_u64(7);
    let guess = CovarianceMatrix::from_twiss(PhasePlane::ALL.map(|plane| {
        let t = truth.twiss(plane).unwrap_or(Twiss { alpha: 0.0, beta: 1.0, emittance: 1e-6 });
        let mut jitter = || 1.0 + rng.gen_range(-0.2..0.2);
        Twiss { alpha: t.alpha * jitter(), beta: t.beta * jitter(), emittance: t.emittance * jitter() }
    }));
    println!("Initial guess error: {:.3e}", guess.relative_distance(&truth));
    println!();

    let mut estimator = CourantSnyderEstimator::new(line, config.estimator)?;
    let start = Instant::now();
    let sigma = estimator.estimate(&guess, &readings)?;
    let elapsed = start.elapsed();

    println!("Estimator:");
    println!("  Iterations        = {}", estimator.iterations());
    println!("  Final alpha       = {:.4}", estimator.alpha());
    println!("  Residual error    = {:.3e}", estimator.residual_error());
    println!("  Convergence error = {:.3e}", estimator.convergence_error());
    println!("  Error vs truth    = {:.3e}", sigma.relative_distance(&truth));
    println!("  Solve time        = {:.2} ms", elapsed.as_secs_f64() * 1e3);
    println!();

    println!("Reconstructed Twiss parameters:");
    for plane in PhasePlane::ALL {
        let t = sigma.twiss(plane)?;
        println!(
            "  {}: alpha = {:+.4}  beta = {:.4} m  emittance = {:.4} mm mrad",
            plane,
            t.alpha,
            t.beta,
            t.emittance * 1e6
        );
    }
    println!();

    let maps = estimator.generator().maps_at(&sigma, &POSITIONS)?;
    println!("Envelope check:");
    for c in compare_envelopes(&sigma, &maps, &readings)? {
        let d = c.relative_deviation();
        println!(
            "  {:<4} deviation = ({:+.2e}, {:+.2e}, {:+.2e})",
            c.location, d[0], d[1], d[2]
        );
    }

    println!();
    println!("===================================================");
    println!("Demo completed successfully!");
    println!("===================================================");
    Ok(())
}

/// `sin²` gap shape sampled at `samples` points over `length` meters.
fn gap_profile(samples: usize, length: f64) -> Result<FieldProfile, Box<dyn std::error::Error>> {
    let shape = (0..samples)
        .map(|i| {
            let u = i as f64 / (samples - 1) as f64;
            (std::f64::consts::PI * u).sin().powi(2)
        })
        .collect();
    Ok(FieldProfile::uniform(length, shape)?)
}

/// Print what a single gap does to the probe
fn demo_integrator(profile: &FieldProfile, drive: RfDrive, probe: &Probe) {
    println!("--- RF Gap Integration ---");
    println!("  Samples: {}, spacing: {:.4} m", profile.len(), profile.spacing());

    let start = Instant::now();
    let ctx = IntegrationContext::precompute(profile, drive, probe, Default::default());
    let map = ctx.full_map();
    let elapsed = start.elapsed();

    println!("  Energy gain: {:.3} keV", ctx.energy_gain(0.0, profile.length()) / 1e3);
    println!("  Exit phase: {:.4} rad", ctx.phases()[profile.len() - 1]);
    for plane in PhasePlane::ALL {
        let b = map.block(plane);
        println!(
            "  {} block: [[{:+.5}, {:+.5}], [{:+.5}, {:+.5}]]  det = {:.6}",
            plane,
            b.m[0][0],
            b.m[0][1],
            b.m[1][0],
            b.m[1][1],
            b.det()
        );
    }
    println!("  Integration time: {}μs", elapsed.as_micros());
}
