//! Beam second-moment state.

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::matrix::Matrix2;
use crate::phase::{HOM, PhaseMatrix, PhasePlane};
use crate::vector::Vector;

/// Courant-Snyder parameters of one phase plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twiss {
    /// Correlation parameter α.
    pub alpha: f64,
    /// Envelope function β.
    pub beta: f64,
    /// RMS emittance ε.
    pub emittance: f64,
}

impl Twiss {
    /// Validated parameters: β and ε must be positive.
    pub fn new(alpha: f64, beta: f64, emittance: f64) -> Result<Self> {
        if !alpha.is_finite() || !(beta > 0.0 && beta.is_finite()) {
            return Err(EnvelopeError::config(format!("invalid Twiss alpha/beta ({alpha}, {beta})")));
        }
        if !(emittance > 0.0 && emittance.is_finite()) {
            return Err(EnvelopeError::config(format!("emittance must be positive, got {emittance}")));
        }
        Ok(Self { alpha, beta, emittance })
    }

    /// `γ = (1 + α²) / β`.
    pub fn gamma(&self) -> f64 {
        (1.0 + self.alpha * self.alpha) / self.beta
    }

    /// Moments `(⟨u²⟩, ⟨uu'⟩, ⟨u'²⟩) = ε (β, -α, γ)`.
    pub fn moments(&self) -> [f64; 3] {
        [
            self.emittance * self.beta,
            -self.emittance * self.alpha,
            self.emittance * self.gamma(),
        ]
    }

    /// Twiss parameters of a moment triple.
    ///
    /// Fails with [`EnvelopeError::NumericDomain`] unless the triple is
    /// positive definite.
    pub fn from_moments(moments: [f64; 3]) -> Result<Self> {
        let [s11, s12, s22] = moments;
        let det = s11 * s22 - s12 * s12;
        if !(s11 > 0.0 && det > 0.0) {
            return Err(EnvelopeError::numeric(format!(
                "moments ({s11:e}, {s12:e}, {s22:e}) are not positive definite"
            )));
        }
        let emittance = det.sqrt();
        Ok(Self { alpha: -s12 / emittance, beta: s11 / emittance, emittance })
    }
}

/// Symmetric second-moment matrix in homogeneous coordinates.
///
/// The 6×6 part holds the phase-space moments; the homogeneous diagonal entry
/// is 1 and the rest of the homogeneous row and column hold the centroid
/// (zero for a centered beam). Under a transfer map `Φ` it evolves as
/// `Φ σ Φᵀ`.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    inner: PhaseMatrix,
}

impl CovarianceMatrix {
    /// Beam with vanishing moments.
    pub fn zero() -> Self {
        Self { inner: PhaseMatrix::zero() }
    }

    /// Uncoupled beam from per-plane Twiss parameters.
    pub fn from_twiss(twiss: [Twiss; 3]) -> Self {
        Self::from_plane_moments(twiss.map(|t| t.moments()))
    }

    /// Uncoupled beam from per-plane moment triples.
    pub fn from_plane_moments(moments: [[f64; 3]; 3]) -> Self {
        let mut blocks = [Matrix2::zero(); 3];
        for (block, [s11, s12, s22]) in blocks.iter_mut().zip(moments) {
            *block = Matrix2::new(s11, s12, s12, s22);
        }
        Self { inner: PhaseMatrix::from_blocks(blocks) }
    }

    /// Wraps a 7×7 moment matrix; it must be symmetric with a homogeneous
    /// diagonal of 1.
    pub fn from_phase_matrix(matrix: PhaseMatrix) -> Result<Self> {
        let scale = (0..HOM)
            .flat_map(|i| (0..HOM).map(move |j| (i, j)))
            .fold(0.0_f64, |acc, (i, j)| acc.max(matrix.get(i, j).abs()));
        let tol = 1e-12 * scale.max(f64::MIN_POSITIVE);
        for i in 0..HOM {
            for j in 0..i {
                if (matrix.get(i, j) - matrix.get(j, i)).abs() > tol {
                    return Err(EnvelopeError::config(format!(
                        "moment matrix is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        if matrix.get(HOM, HOM) != 1.0 {
            return Err(EnvelopeError::config("moment matrix must have a homogeneous diagonal of 1"));
        }
        Ok(Self { inner: matrix })
    }

    /// Underlying 7×7 matrix.
    pub fn as_phase_matrix(&self) -> &PhaseMatrix {
        &self.inner
    }

    /// Moment `⟨uᵢ uⱼ⟩`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.get(row, col)
    }

    /// The plane's 2×2 moment block.
    pub fn block(&self, plane: PhasePlane) -> Matrix2 {
        self.inner.block(plane)
    }

    /// The plane's independent moments `(σ11, σ12, σ22)`.
    pub fn plane_moments(&self, plane: PhasePlane) -> Vector {
        let b = self.inner.block(plane);
        Vector::from_vec(vec![b.m[0][0], b.m[0][1], b.m[1][1]])
    }

    /// Overwrites the plane's moment block from `(σ11, σ12, σ22)`.
    pub fn set_plane_moments(&mut self, plane: PhasePlane, moments: &Vector) -> Result<()> {
        if moments.dim() != 3 {
            return Err(EnvelopeError::DimensionMismatch { expected: 3, found: moments.dim() });
        }
        self.inner
            .set_block(plane, Matrix2::new(moments[0], moments[1], moments[1], moments[2]));
        Ok(())
    }

    /// RMS beam size `√σ11` in the plane; non-physical negative moments read as zero.
    pub fn rms_size(&self, plane: PhasePlane) -> f64 {
        self.inner.block(plane).m[0][0].max(0.0).sqrt()
    }

    /// RMS emittance `√det` of the plane's block.
    pub fn emittance(&self, plane: PhasePlane) -> f64 {
        self.inner.block(plane).det().max(0.0).sqrt()
    }

    /// Courant-Snyder view of one plane.
    pub fn twiss(&self, plane: PhasePlane) -> Result<Twiss> {
        let m = self.plane_moments(plane);
        Twiss::from_moments([m[0], m[1], m[2]])
    }

    /// Moments after the transfer map `map`.
    pub fn propagate(&self, map: &PhaseMatrix) -> Self {
        Self { inner: map.conjugate(&self.inner) }
    }

    /// Relaxed update `(1 - α) self + α target`.
    pub fn relax(&self, target: &Self, alpha: f64) -> Self {
        let mixed = self.inner.times(1.0 - alpha).plus(&target.inner.times(alpha));
        Self { inner: mixed.homogenize() }
    }

    /// Frobenius norm of the 6×6 moment part.
    pub fn moment_norm(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..HOM {
            for j in 0..HOM {
                sum += self.get(i, j).powi(2);
            }
        }
        sum.sqrt()
    }

    /// `‖self - other‖_F / ‖other‖_F` over the 6×6 moment part.
    ///
    /// Falls back to the absolute distance when `other` vanishes.
    pub fn relative_distance(&self, other: &Self) -> f64 {
        let mut sum = 0.0;
        for i in 0..HOM {
            for j in 0..HOM {
                sum += (self.get(i, j) - other.get(i, j)).powi(2);
            }
        }
        let norm = other.moment_norm();
        if norm > 0.0 { sum.sqrt() / norm } else { sum.sqrt() }
    }
}

impl Default for CovarianceMatrix {
    fn default() -> Self {
        Self::zero()
    }
}
