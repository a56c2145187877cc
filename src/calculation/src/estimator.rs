//! Fixed-point Courant-Snyder reconstruction from envelope measurements.
//!
//! Given RMS beam sizes at a handful of diagnostic positions, the estimator
//! looks for the covariance `σ` at the reconstruction point that reproduces
//! them. When the transfer maps themselves depend on the beam (space charge),
//! this is a fixed-point problem `σ = F(σ)`: generate maps for the trial `σ`,
//! solve the per-plane observation problem for `F(σ)`, relax towards it and
//! repeat. The relaxation factor adapts from a secant estimate of `F`'s
//! derivative kept in [`PlaneHistories`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EstimatorConfig;
use crate::covariance::CovarianceMatrix;
use crate::error::{EnvelopeError, Result};
use crate::history::{PLANE_MOMENTS, PlaneHistories};
use crate::matrix::SquareMatrix;
use crate::metrics::{EnvelopeMeasurement, residual_error, validate_measurements};
use crate::phase::{PhaseMatrix, PhasePlane};
use crate::vector::Vector;

/// Source of transfer maps from the reconstruction point to each diagnostic.
pub trait TransferMapGenerator {
    /// One map per entry of `positions`, generated for the trial beam `trial`.
    fn transfer_maps(&mut self, trial: &CovarianceMatrix, positions: &[f64]) -> Result<Vec<PhaseMatrix>>;
}

impl<F> TransferMapGenerator for F
where
    F: FnMut(&CovarianceMatrix, &[f64]) -> Result<Vec<PhaseMatrix>>,
{
    fn transfer_maps(&mut self, trial: &CovarianceMatrix, positions: &[f64]) -> Result<Vec<PhaseMatrix>> {
        self(trial, positions)
    }
}

/// Lifecycle of an estimator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorState {
    /// No run yet, or reset for a new one.
    Initialized,
    /// Inside iteration `iteration` (1-based).
    Iterating {
        /// Current iteration.
        iteration: usize,
    },
    /// Last run met the tolerance.
    Converged,
    /// Last run hit the iteration cap or a hard error.
    Failed,
}

/// Solves the per-plane observation problem for all three planes.
///
/// For each plane the unknowns are `(σ11, σ12, σ22)` at the reconstruction
/// point. A reading through a map whose plane block starts with row `(a, b)`
/// contributes the equation `a² σ11 + 2ab σ12 + b² σ22 = rms²`; the
/// overdetermined system is solved through its normal equations.
fn observe(maps: &[PhaseMatrix], measurements: &[EnvelopeMeasurement]) -> Result<CovarianceMatrix> {
    if maps.len() != measurements.len() {
        return Err(EnvelopeError::DimensionMismatch {
            expected: measurements.len(),
            found: maps.len(),
        });
    }
    let mut sigma = CovarianceMatrix::zero();
    for plane in PhasePlane::ALL {
        let mut normal = SquareMatrix::zeros(PLANE_MOMENTS);
        let mut rhs = Vector::zeros(PLANE_MOMENTS);
        for (map, reading) in maps.iter().zip(measurements) {
            let [a, b] = map.block(plane).m[0];
            let row = [a * a, 2.0 * a * b, b * b];
            let size = reading.rms_size(plane);
            for i in 0..PLANE_MOMENTS {
                rhs[i] += row[i] * size * size;
                for j in 0..PLANE_MOMENTS {
                    normal[(i, j)] += row[i] * row[j];
                }
            }
        }
        let moments = normal.solve(&rhs).map_err(|_| {
            EnvelopeError::numeric(format!("observation matrix of plane {plane} is singular"))
        })?;
        sigma.set_plane_moments(plane, &moments)?;
    }
    Ok(sigma)
}

/// Non-iterative reconstruction through fixed (beam-independent) maps.
///
/// This is the zero-current solution, the usual starting point for
/// [`CourantSnyderEstimator::estimate`].
pub fn estimate_zero_current(
    maps: &[PhaseMatrix],
    measurements: &[EnvelopeMeasurement],
) -> Result<CovarianceMatrix> {
    validate_measurements(measurements)?;
    observe(maps, measurements)
}

/// Relaxed fixed-point estimator with adaptive relaxation factor.
pub struct CourantSnyderEstimator<G> {
    generator: G,
    config: EstimatorConfig,
    state: EstimatorState,
    histories: PlaneHistories,
    covariance: Option<CovarianceMatrix>,
    iterations: usize,
    alpha: f64,
    alpha_history: Vec<f64>,
    residual_error: f64,
    convergence_error: f64,
}

impl<G> std::fmt::Debug for CourantSnyderEstimator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourantSnyderEstimator")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("histories", &self.histories)
            .field("covariance", &self.covariance)
            .field("iterations", &self.iterations)
            .field("alpha", &self.alpha)
            .field("alpha_history", &self.alpha_history)
            .field("residual_error", &self.residual_error)
            .field("convergence_error", &self.convergence_error)
            .finish_non_exhaustive()
    }
}

impl<G: TransferMapGenerator> CourantSnyderEstimator<G> {
    /// Estimator over `generator`; the configuration is validated here.
    pub fn new(generator: G, config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator,
            config,
            state: EstimatorState::Initialized,
            histories: PlaneHistories::new(PLANE_MOMENTS),
            covariance: None,
            iterations: 0,
            alpha: config.default_alpha,
            alpha_history: Vec::new(),
            residual_error: f64::NAN,
            convergence_error: f64::NAN,
        })
    }

    /// Runs the fixed-point iteration from `initial`.
    ///
    /// Returns the converged covariance, or
    /// [`EnvelopeError::ConvergenceFailure`] once `max_iterations` passes
    /// without the relative step dropping below `tolerance`. Generator and
    /// observation errors abort the run immediately.
    pub fn estimate(
        &mut self,
        initial: &CovarianceMatrix,
        measurements: &[EnvelopeMeasurement],
    ) -> Result<CovarianceMatrix> {
        self.reset();
        let result = self.run(initial, measurements);
        match &result {
            Ok(_) => {
                self.state = EstimatorState::Converged;
                info!(
                    iterations = self.iterations,
                    alpha = self.alpha,
                    residual = self.residual_error,
                    "envelope reconstruction converged"
                );
            }
            Err(err) => {
                self.state = EstimatorState::Failed;
                warn!(iterations = self.iterations, error = %err, "envelope reconstruction failed");
            }
        }
        result
    }

    fn reset(&mut self) {
        self.state = EstimatorState::Initialized;
        self.histories.clear();
        self.covariance = None;
        self.iterations = 0;
        self.alpha = self.config.default_alpha;
        self.alpha_history.clear();
        self.residual_error = f64::NAN;
        self.convergence_error = f64::NAN;
    }

    fn run(&mut self, initial: &CovarianceMatrix, measurements: &[EnvelopeMeasurement]) -> Result<CovarianceMatrix> {
        validate_measurements(measurements)?;
        let positions: Vec<f64> = measurements.iter().map(|m| m.position).collect();

        let mut sigma = initial.clone();
        let mut previous: Option<(CovarianceMatrix, CovarianceMatrix)> = None;

        for iteration in 1..=self.config.max_iterations {
            self.state = EstimatorState::Iterating { iteration };
            self.iterations = iteration;

            let maps = self.generator.transfer_maps(&sigma, &positions)?;
            let recursion = observe(&maps, measurements)?;

            if let Some((prev_sigma, prev_recursion)) = &previous {
                for plane in PhasePlane::ALL {
                    let d_sigma = sigma.plane_moments(plane).sub(&prev_sigma.plane_moments(plane))?;
                    let d_recursion =
                        recursion.plane_moments(plane).sub(&prev_recursion.plane_moments(plane))?;
                    self.histories.record(plane, d_sigma, d_recursion);
                }
            }

            let alpha = self.relaxation_factor(iteration);
            let next = sigma.relax(&recursion, alpha);
            let step = next.relative_distance(&sigma);
            let residual = residual_error(&next, &maps, measurements)?;

            self.alpha = alpha;
            self.alpha_history.push(alpha);
            self.residual_error = residual;
            self.convergence_error = step;
            debug!(iteration, alpha, residual, step, "estimator iteration");

            previous = Some((sigma, recursion));
            sigma = next;
            self.covariance = Some(sigma.clone());

            if step < self.config.tolerance {
                let maps = self.generator.transfer_maps(&sigma, &positions)?;
                self.residual_error = residual_error(&sigma, &maps, measurements)?;
                return Ok(sigma);
            }
        }

        Err(EnvelopeError::ConvergenceFailure {
            iterations: self.config.max_iterations,
            error: self.convergence_error,
        })
    }

    /// Largest per-plane candidate, floored at the configured default.
    fn relaxation_factor(&self, iteration: usize) -> f64 {
        let mut alpha = self.config.default_alpha;
        for (plane, candidate) in self.histories.candidates(self.config.rank_tolerance) {
            match candidate {
                Ok(Some(value)) => alpha = alpha.max(value),
                Ok(None) => {}
                Err(err) => {
                    debug!(iteration, %plane, error = %err, "plane skipped in relaxation update");
                }
            }
        }
        alpha
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EstimatorState {
        self.state
    }

    /// Iterations performed by the last run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Relaxation factor of the last iteration.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Relaxation factor of every iteration of the last run.
    pub fn alpha_history(&self) -> &[f64] {
        &self.alpha_history
    }

    /// RMS relative envelope deviation of the latest estimate.
    ///
    /// After convergence the maps are regenerated for the returned covariance.
    /// During iteration, and after a failed run, it is evaluated through the
    /// maps of the previous trial beam.
    pub fn residual_error(&self) -> f64 {
        self.residual_error
    }

    /// Relative step size of the last iteration.
    pub fn convergence_error(&self) -> f64 {
        self.convergence_error
    }

    /// Latest covariance estimate, also after a failed run.
    pub fn covariance(&self) -> Option<&CovarianceMatrix> {
        self.covariance.as_ref()
    }

    /// Iteration settings.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The wrapped generator.
    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Mutable access to the generator between runs.
    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    /// Unwraps the generator.
    pub fn into_generator(self) -> G {
        self.generator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::Twiss;
    use crate::metrics::synthesize_measurements;
    use crate::matrix::Matrix2;
    use approx::assert_relative_eq;

    const GAMMA: f64 = 1.003;

    fn truth() -> CovarianceMatrix {
        CovarianceMatrix::from_twiss([
            Twiss::new(0.5, 2.0, 1.0e-6).unwrap(),
            Twiss::new(-0.3, 1.5, 1.2e-6).unwrap(),
            Twiss::new(0.1, 0.8, 2.0e-6).unwrap(),
        ])
    }

    fn guess() -> CovarianceMatrix {
        CovarianceMatrix::from_twiss([
            Twiss::new(0.6, 1.7, 1.1e-6).unwrap(),
            Twiss::new(-0.25, 1.8, 1.0e-6).unwrap(),
            Twiss::new(0.12, 0.9, 1.7e-6).unwrap(),
        ])
    }

    fn drifts(positions: &[f64]) -> Vec<PhaseMatrix> {
        positions.iter().map(|&p| PhaseMatrix::drift(p, GAMMA)).collect()
    }

    fn readings(positions: &[f64]) -> Vec<EnvelopeMeasurement> {
        synthesize_measurements(&truth(), &drifts(positions), positions).unwrap()
    }

    #[test]
    fn test_zero_current_reconstruction() {
        let positions = [0.5, 1.5, 2.5, 3.5];
        let sigma = estimate_zero_current(&drifts(&positions), &readings(&positions)).unwrap();
        assert!(sigma.relative_distance(&truth()) < 1e-9);
    }

    #[test]
    fn test_fixed_maps_converge_at_default_alpha() {
        let positions = [0.5, 1.5, 2.5, 3.5];
        let generator =
            |_: &CovarianceMatrix, positions: &[f64]| -> Result<Vec<PhaseMatrix>> { Ok(drifts(positions)) };
        let mut estimator = CourantSnyderEstimator::new(generator, EstimatorConfig::default()).unwrap();
        assert_eq!(estimator.state(), EstimatorState::Initialized);

        let sigma = estimator.estimate(&guess(), &readings(&positions)).unwrap();
        assert_eq!(estimator.state(), EstimatorState::Converged);
        assert!(sigma.relative_distance(&truth()) < 1e-8);
        assert!(estimator.iterations() < estimator.config().max_iterations);
        assert!(estimator.convergence_error() < 1e-10);
        assert!(estimator.residual_error() < 1e-8);
        // Beam-independent maps give collinear increments in every plane.
        assert_eq!(estimator.alpha_history().len(), estimator.iterations());
        assert!(estimator.alpha_history().iter().all(|&a| a == 0.5));
        assert_eq!(estimator.alpha(), 0.5);
        assert_eq!(estimator.covariance(), Some(&sigma));
        // Every plane ends on a rank-deficient history, so no candidate ever applied.
        for plane in PhasePlane::ALL {
            let history = estimator.histories.get(plane);
            assert!(history.is_full());
            let err = history.relaxation_candidate(estimator.config().rank_tolerance).unwrap_err();
            assert!(err.is_numeric(), "{plane}: {err}");
        }
    }

    #[test]
    fn test_residual_uses_maps_of_final_beam() {
        let positions = [0.5, 1.5, 2.5, 3.5];
        // Maps stretch slightly with the horizontal beam size.
        let generator = |trial: &CovarianceMatrix, positions: &[f64]| -> Result<Vec<PhaseMatrix>> {
            let stretch = 1.0 + 100.0 * trial.get(0, 0);
            Ok(positions.iter().map(|&p| PhaseMatrix::drift(p * stretch, GAMMA)).collect())
        };
        let maps = generator(&truth(), &positions).unwrap();
        let readings = synthesize_measurements(&truth(), &maps, &positions).unwrap();
        let mut estimator = CourantSnyderEstimator::new(generator, EstimatorConfig::default()).unwrap();

        let sigma = estimator.estimate(&guess(), &readings).unwrap();
        let fresh = generator(&sigma, &positions).unwrap();
        assert_eq!(estimator.residual_error(), residual_error(&sigma, &fresh, &readings).unwrap());
        assert!(sigma.relative_distance(&truth()) < 1e-8);
    }

    #[test]
    fn test_oscillating_generator_fails_at_cap() {
        let positions = [0.5, 1.5, 2.5, 3.5];
        let threshold = truth().get(0, 0) / 2.0;
        let squeeze = PhaseMatrix::from_blocks([Matrix2::new(2.0, 0.0, 0.0, 0.5); 3]);
        let generator = move |trial: &CovarianceMatrix, positions: &[f64]| -> Result<Vec<PhaseMatrix>> {
            let maps = drifts(positions);
            if trial.get(0, 0) > threshold {
                Ok(maps.iter().map(|m| m * &squeeze).collect())
            } else {
                Ok(maps)
            }
        };
        let config = EstimatorConfig { max_iterations: 40, ..Default::default() };
        let mut estimator = CourantSnyderEstimator::new(generator, config).unwrap();

        let err = estimator.estimate(&guess(), &readings(&positions)).unwrap_err();
        match err {
            EnvelopeError::ConvergenceFailure { iterations, error } => {
                assert_eq!(iterations, 40);
                assert!(error > 1e-6);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(estimator.iterations(), 40);
        assert_eq!(estimator.alpha_history().len(), 40);
        assert!(estimator.alpha_history().iter().all(|&a| a >= 0.5));
        assert_eq!(estimator.state(), EstimatorState::Failed);
        assert!(estimator.covariance().is_some());
    }

    #[test]
    fn test_coincident_readings_are_singular() {
        let positions = [1.0, 1.0, 1.0];
        let generator =
            |_: &CovarianceMatrix, positions: &[f64]| -> Result<Vec<PhaseMatrix>> { Ok(drifts(positions)) };
        let mut estimator = CourantSnyderEstimator::new(generator, EstimatorConfig::default()).unwrap();
        let err = estimator.estimate(&guess(), &readings(&positions)).unwrap_err();
        assert!(err.is_numeric());
        assert_eq!(estimator.iterations(), 1);
        assert_eq!(estimator.state(), EstimatorState::Failed);
    }

    #[test]
    fn test_setup_errors() {
        let generator =
            |_: &CovarianceMatrix, positions: &[f64]| -> Result<Vec<PhaseMatrix>> { Ok(drifts(&positions[1..])) };
        let bad = EstimatorConfig { tolerance: 0.0, ..Default::default() };
        assert!(CourantSnyderEstimator::new(generator, bad).unwrap_err().is_configuration());

        let mut estimator = CourantSnyderEstimator::new(generator, EstimatorConfig::default()).unwrap();
        let positions = [0.5, 1.5, 2.5];
        let all = readings(&positions);
        assert!(estimator.estimate(&guess(), &all[..2]).unwrap_err().is_configuration());
        assert_eq!(estimator.iterations(), 0);

        // The generator drops a map.
        let err = estimator.estimate(&guess(), &all).unwrap_err();
        assert_eq!(err, EnvelopeError::DimensionMismatch { expected: 3, found: 2 });
    }

    #[test]
    fn test_generator_errors_propagate() {
        let generator = |_: &CovarianceMatrix, _: &[f64]| -> Result<Vec<PhaseMatrix>> {
            Err(EnvelopeError::numeric("beam size collapsed"))
        };
        let mut estimator = CourantSnyderEstimator::new(generator, EstimatorConfig::default()).unwrap();
        let positions = [0.5, 1.5, 2.5];
        let err = estimator.estimate(&guess(), &readings(&positions)).unwrap_err();
        assert_eq!(err, EnvelopeError::numeric("beam size collapsed"));
    }

    #[test]
    fn test_observation_uses_plane_blocks() {
        let positions = [0.5, 1.5, 2.5];
        let maps = drifts(&positions);
        let sigma = observe(&maps, &readings(&positions)).unwrap();
        for plane in PhasePlane::ALL {
            let got = sigma.plane_moments(plane);
            let want = truth().plane_moments(plane);
            for i in 0..3 {
                assert_relative_eq!(got[i], want[i], max_relative = 1e-8);
            }
        }
    }
}
