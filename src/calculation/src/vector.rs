//! Fixed-dimension real vectors for phase-space and moment calculations.
//!
//! A [`Vector`] owns its components; every arithmetic operation returns a new
//! value, so mutation through one handle never shows up in another.

use std::ops::{Index, IndexMut};

use ndarray::Array1;

use crate::error::{EnvelopeError, Result};

/// Real vector of dimension `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Array1<f64>,
}

impl Vector {
    /// Zero vector of dimension `n`.
    pub fn zeros(n: usize) -> Self {
        Self { data: Array1::zeros(n) }
    }

    /// Creates a vector from its components.
    pub fn from_vec(components: Vec<f64>) -> Self {
        Self { data: Array1::from_vec(components) }
    }

    /// Creates a vector from a slice of components.
    pub fn from_slice(components: &[f64]) -> Self {
        Self::from_vec(components.to_vec())
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    /// Component `i`, or `None` past the end.
    pub fn get(&self, i: usize) -> Option<f64> {
        self.data.get(i).copied()
    }

    /// Sets component `i`.
    pub fn set(&mut self, i: usize, value: f64) -> Result<()> {
        let dim = self.dim();
        let slot = self
            .data
            .get_mut(i)
            .ok_or(EnvelopeError::DimensionMismatch { expected: dim, found: i + 1 })?;
        *slot = value;
        Ok(())
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice().unwrap_or(&[])
    }

    /// Copies the components out.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    pub(crate) fn array(&self) -> &Array1<f64> {
        &self.data
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

    /// Element-wise addition.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check_dim(other)?;
        Ok(Self { data: &self.data + &other.data })
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.check_dim(other)?;
        Ok(Self { data: &self.data - &other.data })
    }

    /// Scalar multiplication.
    pub fn scale(&self, factor: f64) -> Self {
        Self { data: &self.data * factor }
    }

    /// Inner product.
    pub fn dot(&self, other: &Self) -> Result<f64> {
        self.check_dim(other)?;
        Ok(self.data.dot(&other.data))
    }

    /// Sum of absolute values.
    pub fn norm_l1(&self) -> f64 {
        self.data.iter().map(|v| v.abs()).sum()
    }

    /// Euclidean length.
    pub fn norm_l2(&self) -> f64 {
        self.data.dot(&self.data).sqrt()
    }

    /// Largest absolute component.
    pub fn norm_inf(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Component-wise equivalence within an absolute tolerance.
    ///
    /// Vectors of different dimension are never equivalent.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.dim() == other.dim()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl From<Array1<f64>> for Vector {
    fn from(data: Array1<f64>) -> Self {
        Self { data }
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.data[i]
    }
}
