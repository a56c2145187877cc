//! Command-line envelope reconstruction from CSV data.
//!
//! Reads an on-axis field map (`z`, `ez`) and wire-scanner readings
//! (`location`, `position`, `sigma_x`, `sigma_y`, `sigma_z`, all in meters),
//! builds a drift / RF gap / drift line and reconstructs the beam at the line
//! entrance.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use polars::prelude::*;
use tracing::info;

use beamenv_calc::{
    BeamLine, CourantSnyderEstimator, CovarianceMatrix, Element, EnvelopeMeasurement, FieldModel,
    FieldProfile, LogConfig, PhasePlane, Probe, RfDrive, SolverConfig, SpaceCharge, Species,
    estimate_zero_current, init_logging,
};
use beamenv_calc::metrics::compare_envelopes;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SpeciesArg {
    Proton,
    HMinus,
    Electron,
}

impl From<SpeciesArg> for Species {
    fn from(arg: SpeciesArg) -> Self {
        match arg {
            SpeciesArg::Proton => Species::Proton,
            SpeciesArg::HMinus => Species::HMinus,
            SpeciesArg::Electron => Species::Electron,
        }
    }
}

/// Reconstruct beam Twiss parameters from envelope measurements.
#[derive(Debug, Parser)]
#[command(name = "beamenv", version, about)]
struct Args {
    /// Field map CSV with columns `z` (m) and `ez` (V/m)
    #[arg(long)]
    field: PathBuf,

    /// Measurement CSV with columns `location`, `position`, `sigma_x`, `sigma_y`, `sigma_z`
    #[arg(long)]
    measurements: PathBuf,

    /// Particle species
    #[arg(long, value_enum, default_value_t = SpeciesArg::Proton)]
    species: SpeciesArg,

    /// Kinetic energy at the line entrance (MeV)
    #[arg(long, default_value_t = 2.5)]
    energy_mev: f64,

    /// RF frequency (MHz)
    #[arg(long, default_value_t = 352.21)]
    frequency_mhz: f64,

    /// RF phase at the gap entrance (degrees)
    #[arg(long, default_value_t = -30.0, allow_hyphen_values = true)]
    phase_deg: f64,

    /// Field scale; defaults to the peak of the field map (V/m)
    #[arg(long)]
    amplitude: Option<f64>,

    /// Drift between the line entrance and the gap (m)
    #[arg(long, default_value_t = 0.0)]
    gap_start: f64,

    /// Transverse generalized perveance; 0 disables space charge
    #[arg(long, default_value_t = 0.0)]
    perveance: f64,

    /// Longitudinal perveance (m)
    #[arg(long, default_value_t = 0.0)]
    longitudinal_perveance: f64,

    /// Space-charge slice length (m)
    #[arg(long, default_value_t = 0.05)]
    slice_length: f64,

    /// Solver configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every estimator iteration
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SolverConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => SolverConfig::default(),
    };
    if args.verbose {
        config.logging = LogConfig::development();
    }
    init_logging(&config.logging);

    let (profile, peak) = read_field(&args.field)?;
    let amplitude = args.amplitude.unwrap_or(peak);
    let mut readings = read_measurements(&args.measurements)?;
    readings.sort_by(|a, b| a.position.total_cmp(&b.position));
    let positions: Vec<f64> = readings.iter().map(|m| m.position).collect();
    info!(samples = profile.len(), readings = readings.len(), "inputs loaded");

    let probe = Probe::of_species(args.species.into(), args.energy_mev * 1e6)?;
    let drive = RfDrive::new(args.frequency_mhz * 1e6, amplitude, args.phase_deg.to_radians())?;
    let gap_end = args.gap_start + profile.length();

    let mut elements = Vec::new();
    if args.gap_start > 0.0 {
        elements.push(Element::drift(args.gap_start));
    }
    elements.push(Element::rf_gap(FieldModel::sampled(profile), drive));
    let last = positions.last().copied().unwrap_or(gap_end);
    if last > gap_end {
        elements.push(Element::drift(last - gap_end));
    }

    let mut line = BeamLine::new(probe, elements)?.with_formula(config.longitudinal);
    let seed = estimate_zero_current(&line.zero_current_maps(&positions)?, &readings)?;
    print_twiss("Zero-current reconstruction", &seed)?;

    let sigma = if args.perveance > 0.0 || args.longitudinal_perveance > 0.0 {
        line = line.with_space_charge(SpaceCharge::new(
            args.perveance,
            args.longitudinal_perveance,
            args.slice_length,
        )?);
        let mut estimator = CourantSnyderEstimator::new(line.clone(), config.estimator)?;
        let sigma = estimator.estimate(&seed, &readings)?;
        println!(
            "Space-charge solve: {} iterations, alpha = {:.3}, residual = {:.3e}",
            estimator.iterations(),
            estimator.alpha(),
            estimator.residual_error()
        );
        print_twiss("Space-charge reconstruction", &sigma)?;
        sigma
    } else {
        seed
    };

    println!("Envelope fit:");
    let maps = line.maps_at(&sigma, &positions)?;
    for c in compare_envelopes(&sigma, &maps, &readings)? {
        println!(
            "  {:<10} {:>8.3} m  x {:.4}/{:.4}  y {:.4}/{:.4}  z {:.4}/{:.4} mm",
            c.location,
            c.position,
            c.predicted[0] * 1e3,
            c.measured[0] * 1e3,
            c.predicted[1] * 1e3,
            c.measured[1] * 1e3,
            c.predicted[2] * 1e3,
            c.measured[2] * 1e3
        );
    }
    Ok(())
}

/// Field map as a unit-peak profile plus its peak value.
fn read_field(path: &Path) -> Result<(FieldProfile, f64), Box<dyn Error>> {
    let df = CsvReader::from_path(path)?.has_header(true).finish()?;
    let z = float_column(&df, "z")?;
    let ez = float_column(&df, "ez")?;

    let peak = ez.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if peak == 0.0 {
        return Err(format!("field map {} is identically zero", path.display()).into());
    }
    let z0 = z.first().copied().unwrap_or(0.0);
    let positions = z.iter().map(|v| v - z0).collect();
    let shape = ez.iter().map(|v| v / peak).collect();
    Ok((FieldProfile::new(positions, shape)?, peak))
}

fn read_measurements(path: &Path) -> Result<Vec<EnvelopeMeasurement>, Box<dyn Error>> {
    let df = CsvReader::from_path(path)?.has_header(true).finish()?;
    let locations: Vec<String> = df
        .column("location")?
        .cast(&DataType::Utf8)?
        .utf8()?
        .into_no_null_iter()
        .map(str::to_string)
        .collect();
    let position = float_column(&df, "position")?;
    let sx = float_column(&df, "sigma_x")?;
    let sy = float_column(&df, "sigma_y")?;
    let sz = float_column(&df, "sigma_z")?;

    let mut readings = Vec::with_capacity(locations.len());
    for (i, location) in locations.into_iter().enumerate() {
        readings.push(EnvelopeMeasurement::new(location, position[i], [sx[i], sy[i], sz[i]])?);
    }
    Ok(readings)
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, Box<dyn Error>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?;
    if values.null_count() > 0 {
        return Err(format!("column {name} has missing values").into());
    }
    Ok(values.into_no_null_iter().collect())
}

fn print_twiss(title: &str, sigma: &CovarianceMatrix) -> Result<(), Box<dyn Error>> {
    println!("{title}:");
    for plane in PhasePlane::ALL {
        let t = sigma.twiss(plane)?;
        println!(
            "  {}: alpha = {:+.4}  beta = {:.4} m  emittance = {:.4e} m rad",
            plane, t.alpha, t.beta, t.emittance
        );
    }
    Ok(())
}
