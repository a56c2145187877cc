//! Homogeneous 7-dimensional phase-space operators.
//!
//! Coordinates are ordered `(x, x', y, y', z, z', 1)`: three conjugate pairs
//! followed by the fixed homogeneous component. Affine maps (including pure
//! translations) are then ordinary 7×7 matrix products, and composing `B`
//! after `A` is `B * A`.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::matrix::{Matrix2, SquareMatrix};
use crate::vector::Vector;

/// Dimension of the homogeneous phase space.
pub const PHASE_DIM: usize = 7;

/// Index of the homogeneous coordinate.
pub const HOM: usize = 6;

/// One of the three decoupled phase planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhasePlane {
    /// Transverse x.
    Horizontal,
    /// Transverse y.
    Vertical,
    /// Longitudinal z.
    Longitudinal,
}

impl PhasePlane {
    /// All planes in coordinate order.
    pub const ALL: [PhasePlane; 3] =
        [PhasePlane::Horizontal, PhasePlane::Vertical, PhasePlane::Longitudinal];

    /// Index of the plane's position coordinate; the conjugate momentum follows it.
    pub const fn offset(&self) -> usize {
        match self {
            PhasePlane::Horizontal => 0,
            PhasePlane::Vertical => 2,
            PhasePlane::Longitudinal => 4,
        }
    }

    /// Position of the plane in [`PhasePlane::ALL`].
    pub const fn index(&self) -> usize {
        self.offset() / 2
    }
}

impl std::fmt::Display for PhasePlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PhasePlane::Horizontal => "x",
            PhasePlane::Vertical => "y",
            PhasePlane::Longitudinal => "z",
        })
    }
}

/// Phase-space point augmented with the homogeneous 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseVector {
    inner: Vector,
}

impl PhaseVector {
    /// Point with the given six coordinates.
    pub fn new(coords: [f64; 6]) -> Self {
        let mut data = coords.to_vec();
        data.push(1.0);
        Self { inner: Vector::from_vec(data) }
    }

    /// Origin.
    pub fn origin() -> Self {
        Self::new([0.0; 6])
    }

    /// Wraps a 7-vector, forcing the homogeneous component to 1.
    pub fn from_vector(v: Vector) -> Result<Self> {
        if v.dim() != PHASE_DIM {
            return Err(EnvelopeError::DimensionMismatch { expected: PHASE_DIM, found: v.dim() });
        }
        let mut inner = v;
        inner[HOM] = 1.0;
        Ok(Self { inner })
    }

    /// The six phase coordinates.
    pub fn coords(&self) -> [f64; 6] {
        let mut out = [0.0; 6];
        out.copy_from_slice(&self.inner.as_slice()[..6]);
        out
    }

    /// Underlying 7-vector.
    pub fn as_vector(&self) -> &Vector {
        &self.inner
    }
}

/// 7×7 homogeneous transfer matrix.
///
/// A matrix representing a linear (non-corrupting) operator has zeros in the
/// homogeneous row and column except for a 1 on the diagonal. Products of such
/// matrices keep that shape; sums do not, which is what [`PhaseMatrix::homogenize`]
/// repairs.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseMatrix {
    inner: SquareMatrix,
}

impl PhaseMatrix {
    /// Identity operator.
    pub fn identity() -> Self {
        Self { inner: SquareMatrix::identity(PHASE_DIM) }
    }

    /// Zero operator on the phase coordinates; the homogeneous diagonal is still 1.
    pub fn zero() -> Self {
        let mut inner = SquareMatrix::zeros(PHASE_DIM);
        inner[(HOM, HOM)] = 1.0;
        Self { inner }
    }

    /// Operator adding `delta` to the six phase coordinates.
    pub fn translation(delta: [f64; 6]) -> Self {
        let mut m = Self::identity();
        for (i, d) in delta.iter().enumerate() {
            m.inner[(i, HOM)] = *d;
        }
        m
    }

    /// Drift of `length` meters for a particle with Lorentz factor `gamma`.
    ///
    /// Transverse positions advance by `length · x'`; the longitudinal
    /// position slips by `length / γ²` per unit momentum deviation.
    pub fn drift(length: f64, gamma: f64) -> Self {
        let mut m = Self::identity();
        m.set_block(PhasePlane::Horizontal, Matrix2::new(1.0, length, 0.0, 1.0));
        m.set_block(PhasePlane::Vertical, Matrix2::new(1.0, length, 0.0, 1.0));
        m.set_block(PhasePlane::Longitudinal, Matrix2::new(1.0, length / (gamma * gamma), 0.0, 1.0));
        m
    }

    /// Block-diagonal operator from three per-plane blocks.
    pub fn from_blocks(blocks: [Matrix2; 3]) -> Self {
        let mut m = Self::identity();
        for (plane, block) in PhasePlane::ALL.iter().zip(blocks.iter()) {
            m.set_block(*plane, *block);
        }
        m
    }

    /// Wraps a general 7×7 matrix as is; call [`PhaseMatrix::homogenize`] to
    /// enforce the homogeneous shape.
    pub fn from_matrix(inner: SquareMatrix) -> Result<Self> {
        if inner.dim() != PHASE_DIM {
            return Err(EnvelopeError::DimensionMismatch { expected: PHASE_DIM, found: inner.dim() });
        }
        Ok(Self { inner })
    }

    /// Underlying matrix.
    pub fn as_matrix(&self) -> &SquareMatrix {
        &self.inner
    }

    /// Entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner[(row, col)]
    }

    /// Sets the entry at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.inner.set(row, col, value)
    }

    /// The plane's 2×2 diagonal block.
    pub fn block(&self, plane: PhasePlane) -> Matrix2 {
        let o = plane.offset();
        Matrix2::new(
            self.inner[(o, o)],
            self.inner[(o, o + 1)],
            self.inner[(o + 1, o)],
            self.inner[(o + 1, o + 1)],
        )
    }

    /// Overwrites the plane's 2×2 diagonal block.
    pub fn set_block(&mut self, plane: PhasePlane, block: Matrix2) {
        let o = plane.offset();
        for i in 0..2 {
            for j in 0..2 {
                self.inner[(o + i, o + j)] = block.m[i][j];
            }
        }
    }

    /// Restores the homogeneous row and column: zeros off the diagonal, 1 on it.
    ///
    /// The translation column is kept; only the homogeneous row and the
    /// homogeneous diagonal entry are reset.
    pub fn homogenize(&self) -> Self {
        let mut out = self.clone();
        for j in 0..HOM {
            out.inner[(HOM, j)] = 0.0;
        }
        out.inner[(HOM, HOM)] = 1.0;
        out
    }

    /// Whether the homogeneous row is `(0, …, 0, 1)` within `tol`.
    pub fn is_homogeneous(&self, tol: f64) -> bool {
        (0..HOM).all(|j| self.inner[(HOM, j)].abs() <= tol)
            && (self.inner[(HOM, HOM)] - 1.0).abs() <= tol
    }

    /// Composition `self * other`: `other` is applied first.
    pub fn compose(&self, other: &Self) -> Self {
        let inner = self
            .inner
            .mul(&other.inner)
            .unwrap_or_else(|_| unreachable!("phase matrices are always 7x7"));
        Self { inner }
    }

    /// Entry-wise sum; generally needs [`PhaseMatrix::homogenize`] afterwards.
    pub fn plus(&self, other: &Self) -> Self {
        let inner = self
            .inner
            .add(&other.inner)
            .unwrap_or_else(|_| unreachable!("phase matrices are always 7x7"));
        Self { inner }
    }

    /// Scalar multiple; generally needs [`PhaseMatrix::homogenize`] afterwards.
    pub fn times(&self, factor: f64) -> Self {
        Self { inner: self.inner.scale(factor) }
    }

    /// Transpose.
    pub fn transpose(&self) -> Self {
        Self { inner: self.inner.transpose() }
    }

    /// Inverse operator.
    pub fn inverse(&self) -> Result<Self> {
        Ok(Self { inner: self.inner.inverse()? })
    }

    /// Maps a phase point.
    pub fn apply(&self, v: &PhaseVector) -> PhaseVector {
        let mapped = self
            .inner
            .mul_vector(v.as_vector())
            .unwrap_or_else(|_| unreachable!("phase vectors are always 7-dimensional"));
        PhaseVector { inner: mapped }
    }

    /// Congruence `self · σ · selfᵀ`, the transport of a second-moment matrix.
    pub fn conjugate(&self, sigma: &Self) -> Self {
        self.compose(sigma).compose(&self.transpose())
    }

    /// Entry-wise equivalence within an absolute tolerance.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.inner.approx_eq(&other.inner, tol)
    }

    /// Largest absolute entry difference.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..PHASE_DIM {
            for j in 0..PHASE_DIM {
                worst = worst.max((self.get(i, j) - other.get(i, j)).abs());
            }
        }
        worst
    }
}

impl Default for PhaseMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for &PhaseMatrix {
    type Output = PhaseMatrix;

    fn mul(self, rhs: &PhaseMatrix) -> PhaseMatrix {
        self.compose(rhs)
    }
}

impl Mul for PhaseMatrix {
    type Output = PhaseMatrix;

    fn mul(self, rhs: PhaseMatrix) -> PhaseMatrix {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_matrix() -> PhaseMatrix {
        let mut m = PhaseMatrix::from_blocks([
            Matrix2::new(1.1, 0.4, -0.2, 0.84),
            Matrix2::new(0.9, -0.3, 0.1, 1.08),
            Matrix2::new(1.0, 0.02, -0.5, 0.99),
        ]);
        m.set(0, 2, 0.05).unwrap();
        m.set(3, HOM, 1e-3).unwrap();
        m
    }

    #[test]
    fn test_identity_and_zero_homogeneous_entry() {
        assert_eq!(PhaseMatrix::identity().get(HOM, HOM), 1.0);
        let zero = PhaseMatrix::zero();
        assert_eq!(zero.get(HOM, HOM), 1.0);
        assert_eq!(zero.get(0, 0), 0.0);
        assert!(zero.is_homogeneous(0.0));
    }

    #[test]
    fn test_identity_law() {
        let m = sample_matrix();
        assert!((&PhaseMatrix::identity() * &m).approx_eq(&m, 1e-12));
        assert!((&m * &PhaseMatrix::identity()).approx_eq(&m, 1e-12));
    }

    #[test]
    fn test_translation_adds_delta() {
        let delta = [0.1, -0.2, 0.3, 0.0, 1.5, -2.0];
        let t = PhaseMatrix::translation(delta);
        assert_eq!(t.get(HOM, HOM), 1.0);
        let p = PhaseVector::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let moved = t.apply(&p).coords();
        for i in 0..6 {
            assert_relative_eq!(moved[i], p.coords()[i] + delta[i]);
        }
    }

    #[test]
    fn test_homogenize_after_sum() {
        let sum = PhaseMatrix::identity().plus(&PhaseMatrix::identity());
        assert_eq!(sum.get(HOM, HOM), 2.0);
        assert!(!sum.is_homogeneous(1e-12));
        let fixed = sum.homogenize();
        assert_eq!(fixed.get(HOM, HOM), 1.0);
        assert_eq!(fixed.get(0, 0), 2.0);
        assert!(fixed.is_homogeneous(0.0));
    }

    #[test]
    fn test_blocks_roundtrip() {
        let block = Matrix2::new(1.0, 2.0, 3.0, 4.0);
        let mut m = PhaseMatrix::identity();
        m.set_block(PhasePlane::Longitudinal, block);
        assert_eq!(m.block(PhasePlane::Longitudinal), block);
        assert_eq!(m.get(4, 5), 2.0);
        assert_eq!(m.block(PhasePlane::Horizontal), Matrix2::identity());
    }

    #[test]
    fn test_drift() {
        let gamma = 1.25;
        let d = PhaseMatrix::drift(2.0, gamma);
        let p = d.apply(&PhaseVector::new([0.0, 1e-3, 0.0, -2e-3, 0.0, 1e-2]));
        let c = p.coords();
        assert_relative_eq!(c[0], 2e-3);
        assert_relative_eq!(c[2], -4e-3);
        assert_relative_eq!(c[4], 2.0 * 1e-2 / (gamma * gamma));
    }

    #[test]
    fn test_inverse() {
        let m = sample_matrix();
        let inv = m.inverse().unwrap();
        assert!((&m * &inv).approx_eq(&PhaseMatrix::identity(), 1e-12));
    }

    #[test]
    fn test_from_matrix_dimension() {
        let err = PhaseMatrix::from_matrix(SquareMatrix::identity(6)).unwrap_err();
        assert_eq!(err, EnvelopeError::DimensionMismatch { expected: 7, found: 6 });
        assert!(PhaseVector::from_vector(Vector::zeros(6)).is_err());
    }

    #[test]
    fn test_plane_indices() {
        assert_eq!(PhasePlane::Vertical.offset(), 2);
        assert_eq!(PhasePlane::Longitudinal.index(), 2);
        assert_eq!(PhasePlane::Horizontal.to_string(), "x");
    }
}
