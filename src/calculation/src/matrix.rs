//! Square real matrices and the 2×2 closed-form exponential.
//!
//! [`SquareMatrix`] is the general n×n value type backed by `ndarray`;
//! factorizations (determinant, inverse, linear solves) go through `nalgebra`'s
//! LU decomposition. [`Matrix2`] is the stack-allocated 2×2 specialization used
//! for per-plane transfer blocks.

use std::ops::{Index, IndexMut};

use nalgebra::{DMatrix, DVector, Dyn, LU};
use ndarray::Array2;

use crate::error::{EnvelopeError, Result};
use crate::vector::Vector;

/// Relative pivot size below which a matrix is treated as singular.
const SINGULAR_PIVOT: f64 = 1e-13;

/// Real n×n matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    data: Array2<f64>,
}

impl SquareMatrix {
    /// Zero matrix.
    pub fn zeros(n: usize) -> Self {
        Self { data: Array2::zeros((n, n)) }
    }

    /// Identity matrix.
    pub fn identity(n: usize) -> Self {
        Self { data: Array2::eye(n) }
    }

    /// Builds a matrix from rows; every row must have as many entries as there are rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let mut m = Self::zeros(n);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(EnvelopeError::DimensionMismatch { expected: n, found: row.len() });
            }
            for (j, &value) in row.iter().enumerate() {
                m.data[[i, j]] = value;
            }
        }
        Ok(m)
    }

    /// Builds a matrix whose columns are the given vectors.
    pub fn from_columns(columns: &[Vector]) -> Result<Self> {
        let n = columns.len();
        let mut m = Self::zeros(n);
        for (j, column) in columns.iter().enumerate() {
            if column.dim() != n {
                return Err(EnvelopeError::DimensionMismatch { expected: n, found: column.dim() });
            }
            for i in 0..n {
                m.data[[i, j]] = column[i];
            }
        }
        Ok(m)
    }

    /// Row/column count.
    pub fn dim(&self) -> usize {
        self.data.nrows()
    }

    /// Entry at `(row, col)`, or `None` when out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    /// Sets the entry at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let n = self.dim();
        let slot = self
            .data
            .get_mut((row, col))
            .ok_or(EnvelopeError::DimensionMismatch { expected: n, found: row.max(col) + 1 })?;
        *slot = value;
        Ok(())
    }

    fn check_dim(&self, other: &Self) -> Result<()> {
        if self.dim() != other.dim() {
            return Err(EnvelopeError::DimensionMismatch {
                expected: self.dim(),
                found: other.dim(),
            });
        }
        Ok(())
    }

    /// Element-wise sum.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check_dim(other)?;
        Ok(Self { data: &self.data + &other.data })
    }

    /// Element-wise difference.
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.check_dim(other)?;
        Ok(Self { data: &self.data - &other.data })
    }

    /// Scalar multiple.
    pub fn scale(&self, factor: f64) -> Self {
        Self { data: &self.data * factor }
    }

    /// Matrix product `self * other`.
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.check_dim(other)?;
        Ok(Self { data: self.data.dot(&other.data) })
    }

    /// Matrix-vector product `self * v`.
    pub fn mul_vector(&self, v: &Vector) -> Result<Vector> {
        if v.dim() != self.dim() {
            return Err(EnvelopeError::DimensionMismatch { expected: self.dim(), found: v.dim() });
        }
        Ok(Vector::from(self.data.dot(v.array())))
    }

    /// Transpose.
    pub fn transpose(&self) -> Self {
        Self { data: self.data.t().to_owned() }
    }

    /// Sum of the diagonal.
    pub fn trace(&self) -> f64 {
        self.data.diag().sum()
    }

    /// Frobenius norm.
    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    fn to_nalgebra(&self) -> DMatrix<f64> {
        let n = self.dim();
        DMatrix::from_fn(n, n, |i, j| self.data[[i, j]])
    }

    fn from_nalgebra(m: &DMatrix<f64>) -> Self {
        Self { data: Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)]) }
    }

    /// LU factorization, rejecting matrices whose smallest pivot falls below
    /// `1e-13` times the largest entry.
    fn factorize(&self) -> Result<LU<f64, Dyn, Dyn>> {
        let n = self.dim();
        let scale = self.max_abs();
        if n == 0 || scale == 0.0 || !scale.is_finite() {
            return Err(EnvelopeError::numeric("matrix is zero, empty or non-finite"));
        }
        let lu = self.to_nalgebra().lu();
        let pivot = lu.u().diagonal().iter().fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
        if pivot <= SINGULAR_PIVOT * scale {
            return Err(EnvelopeError::numeric(format!("singular {n}x{n} matrix (pivot {pivot:e})")));
        }
        Ok(lu)
    }

    /// Determinant from the LU factorization.
    pub fn determinant(&self) -> f64 {
        if self.dim() == 0 {
            return 1.0;
        }
        self.to_nalgebra().lu().determinant()
    }

    /// Inverse matrix.
    ///
    /// Fails with [`EnvelopeError::NumericDomain`] for (numerically) singular matrices.
    pub fn inverse(&self) -> Result<Self> {
        let inverse = self
            .factorize()?
            .try_inverse()
            .ok_or_else(|| EnvelopeError::numeric("LU factors are not invertible"))?;
        Ok(Self::from_nalgebra(&inverse))
    }

    /// Solution `x` of `self · x = rhs`.
    pub fn solve(&self, rhs: &Vector) -> Result<Vector> {
        let n = self.dim();
        if rhs.dim() != n {
            return Err(EnvelopeError::DimensionMismatch { expected: n, found: rhs.dim() });
        }
        let b = DVector::from_fn(n, |i, _| rhs[i]);
        let x = self
            .factorize()?
            .solve(&b)
            .ok_or_else(|| EnvelopeError::numeric("LU solve failed"))?;
        Ok(Vector::from_vec(x.iter().copied().collect()))
    }

    /// Solution `X` of `self · X = rhs`.
    pub fn solve_matrix(&self, rhs: &Self) -> Result<Self> {
        self.check_dim(rhs)?;
        let x = self
            .factorize()?
            .solve(&rhs.to_nalgebra())
            .ok_or_else(|| EnvelopeError::numeric("LU solve failed"))?;
        Ok(Self::from_nalgebra(&x))
    }

    /// Entry-wise equivalence within an absolute tolerance.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.dim() == other.dim()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl Index<(usize, usize)> for SquareMatrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[[row, col]]
    }
}

impl IndexMut<(usize, usize)> for SquareMatrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        &mut self.data[[row, col]]
    }
}

/// 2×2 real matrix `[[a, b], [c, d]]`, the per-plane transfer block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matrix2 {
    /// Row-major entries.
    pub m: [[f64; 2]; 2],
}

impl Matrix2 {
    /// Creates `[[a, b], [c, d]]`.
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { m: [[a, b], [c, d]] }
    }

    /// Identity.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0)
    }

    /// Zero matrix.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Product `self * other`.
    #[inline(always)]
    pub fn mul(&self, other: &Self) -> Self {
        let [[a, b], [c, d]] = self.m;
        let [[e, f], [g, h]] = other.m;
        Self::new(a * e + b * g, a * f + b * h, c * e + d * g, c * f + d * h)
    }

    /// Entry-wise sum.
    pub fn add(&self, other: &Self) -> Self {
        let [[a, b], [c, d]] = self.m;
        let [[e, f], [g, h]] = other.m;
        Self::new(a + e, b + f, c + g, d + h)
    }

    /// Scalar multiple.
    pub fn scale(&self, factor: f64) -> Self {
        let [[a, b], [c, d]] = self.m;
        Self::new(a * factor, b * factor, c * factor, d * factor)
    }

    /// Transpose.
    pub fn transpose(&self) -> Self {
        let [[a, b], [c, d]] = self.m;
        Self::new(a, c, b, d)
    }

    /// Determinant.
    pub fn det(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    /// Trace.
    pub fn trace(&self) -> f64 {
        self.m[0][0] + self.m[1][1]
    }

    /// Matrix exponential in closed form.
    ///
    /// With `t = (a + d) / 2` and `D = (a - d)² + 4bc`, the traceless part
    /// `N = A - tI` squares to `(D / 4) I`, so
    /// `exp(A) = eᵗ (C I + S N)` where for `D > 0` `C = cosh(√D/2)`,
    /// `S = 2 sinh(√D/2)/√D`; for `D < 0` the trigonometric counterparts with
    /// `√-D`; and for `D = 0` the limit `C = 1`, `S = 1`.
    pub fn exp(&self) -> Self {
        let [[a, b], [c, d]] = self.m;
        let t = 0.5 * (a + d);
        let disc = (a - d) * (a - d) + 4.0 * b * c;

        let (cosine, sine) = if disc > 0.0 {
            let root = disc.sqrt();
            let half = 0.5 * root;
            (half.cosh(), 2.0 * half.sinh() / root)
        } else if disc < 0.0 {
            let root = (-disc).sqrt();
            let half = 0.5 * root;
            (half.cos(), 2.0 * half.sin() / root)
        } else {
            (1.0, 1.0)
        };

        let scale = t.exp();
        let n_a = a - t;
        let n_d = d - t;
        Self::new(
            scale * (cosine + sine * n_a),
            scale * sine * b,
            scale * sine * c,
            scale * (cosine + sine * n_d),
        )
    }

    /// Largest absolute difference between entries.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..2 {
            for j in 0..2 {
                worst = worst.max((self.m[i][j] - other.m[i][j]).abs());
            }
        }
        worst
    }
}
