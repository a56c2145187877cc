//! Finite-difference history for the relaxation-factor update.
//!
//! Each phase plane keeps the last few increments of its moment vector `σ`
//! and of the recursion value `F(σ)`. Once a plane's buffer is full the two
//! increment sets give a secant estimate of the local derivative
//! `J ≈ ΔF · ΔΣ⁻¹`, from which a relaxation-factor candidate follows.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{EnvelopeError, Result};
use crate::matrix::SquareMatrix;
use crate::phase::PhasePlane;
use crate::vector::Vector;

/// Independent moments per plane block, and so the number of increments kept.
pub const PLANE_MOMENTS: usize = 3;

/// Fixed-capacity ring buffer of `(Δσ, ΔF)` increments for one plane.
#[derive(Debug, Clone)]
pub struct IncrementHistory {
    capacity: usize,
    sigma: VecDeque<Vector>,
    recursion: VecDeque<Vector>,
}

impl IncrementHistory {
    /// Empty buffer holding up to `capacity` increments.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sigma: VecDeque::with_capacity(capacity),
            recursion: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends an increment pair, evicting the oldest when full.
    pub fn push(&mut self, d_sigma: Vector, d_recursion: Vector) {
        if self.sigma.len() == self.capacity {
            self.sigma.pop_front();
            self.recursion.pop_front();
        }
        self.sigma.push_back(d_sigma);
        self.recursion.push_back(d_recursion);
    }

    /// Number of stored increments.
    pub fn len(&self) -> usize {
        self.sigma.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.sigma.is_empty()
    }

    /// Whether the buffer holds `capacity` increments.
    pub fn is_full(&self) -> bool {
        self.sigma.len() == self.capacity
    }

    /// Drops every increment.
    pub fn clear(&mut self) {
        self.sigma.clear();
        self.recursion.clear();
    }

    /// `|det ΔΣ| / Π ‖Δσᵢ‖`: 1 for orthogonal increments, 0 for dependent ones.
    pub fn normalized_determinant(&self) -> Result<f64> {
        let columns: Vec<Vector> = self.sigma.iter().cloned().collect();
        let sigma = SquareMatrix::from_columns(&columns)?;
        let scale: f64 = columns.iter().map(Vector::norm_l2).product();
        if scale == 0.0 || !scale.is_finite() {
            return Ok(0.0);
        }
        Ok(sigma.determinant().abs() / scale)
    }

    /// Relaxation-factor candidate `|tr R| / ‖R‖_F` with `R = I - ΔF ΔΣ⁻¹`.
    ///
    /// `Ok(None)` while the buffer is still filling. A rank-deficient
    /// `ΔΣ` (normalized determinant below `rank_tolerance`) or a vanishing
    /// `R` is a [`EnvelopeError::NumericDomain`] the caller is expected to
    /// recover from.
    pub fn relaxation_candidate(&self, rank_tolerance: f64) -> Result<Option<f64>> {
        if !self.is_full() {
            return Ok(None);
        }
        let normalized = self.normalized_determinant()?;
        if normalized < rank_tolerance {
            return Err(EnvelopeError::numeric(format!(
                "increment history is rank deficient (normalized determinant {normalized:e})"
            )));
        }
        let sigma: Vec<Vector> = self.sigma.iter().cloned().collect();
        let recursion: Vec<Vector> = self.recursion.iter().cloned().collect();
        let d_sigma = SquareMatrix::from_columns(&sigma)?;
        let d_recursion = SquareMatrix::from_columns(&recursion)?;

        // J ΔΣ = ΔF is solved in transposed form; trace and norm of R are transpose-invariant.
        let jacobian_t = d_sigma.transpose().solve_matrix(&d_recursion.transpose())?;
        let r = SquareMatrix::identity(self.capacity).sub(&jacobian_t)?;
        let norm = r.frobenius_norm();
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(EnvelopeError::numeric("secant residual operator vanishes"));
        }
        Ok(Some(r.trace().abs() / norm))
    }
}

/// One [`IncrementHistory`] per phase plane.
#[derive(Debug, Clone)]
pub struct PlaneHistories {
    planes: BTreeMap<PhasePlane, IncrementHistory>,
}

impl PlaneHistories {
    /// Empty buffers for all planes.
    pub fn new(capacity: usize) -> Self {
        let planes = PhasePlane::ALL
            .iter()
            .map(|plane| (*plane, IncrementHistory::new(capacity)))
            .collect();
        Self { planes }
    }

    /// Buffer of one plane.
    pub fn get(&self, plane: PhasePlane) -> &IncrementHistory {
        &self.planes[&plane]
    }

    /// Records an increment pair for one plane.
    pub fn record(&mut self, plane: PhasePlane, d_sigma: Vector, d_recursion: Vector) {
        if let Some(history) = self.planes.get_mut(&plane) {
            history.push(d_sigma, d_recursion);
        }
    }

    /// Empties every buffer.
    pub fn clear(&mut self) {
        self.planes.values_mut().for_each(IncrementHistory::clear);
    }

    /// Per-plane candidates, in plane order.
    pub fn candidates(&self, rank_tolerance: f64) -> Vec<(PhasePlane, Result<Option<f64>>)> {
        self.planes
            .iter()
            .map(|(plane, history)| (*plane, history.relaxation_candidate(rank_tolerance)))
            .collect()
    }
}

impl Default for PlaneHistories {
    fn default() -> Self {
        Self::new(PLANE_MOMENTS)
    }
}
