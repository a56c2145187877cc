//! Beam envelope transfer maps and Courant-Snyder reconstruction.
//!
//! This library provides:
//! - Homogeneous 7×7 phase-space operators on top of small vectors and matrices
//! - A two-pass RF field integrator turning sampled axial fields into transfer maps
//! - Second-moment (covariance) beam states with Twiss views
//! - A relaxed fixed-point estimator that reconstructs the beam from measured
//!   envelopes, optionally through beam-size-dependent (space-charge) maps
//!
//! # Features
//!
//! - **Closed-form**: 2×2 generators are exponentiated analytically
//! - **Explicit state**: phase/energy precompute lives in an [`IntegrationContext`] value
//! - **Transparent**: iteration count, relaxation factor and errors are queryable after a solve

#![warn(missing_docs)]
#![warn(clippy::doc_markdown)]
#![allow(clippy::inconsistent_struct_constructor)]

pub mod config;
pub mod constants;
pub mod covariance;
pub mod error;
pub mod estimator;
pub mod field;
pub mod history;
pub mod lattice;
pub mod logging;
pub mod matrix;
pub mod metrics;
pub mod ode;
pub mod phase;
pub mod probe;
pub mod transfer;
pub mod vector;

// Re-export key types and functions for easy use
pub use config::{EstimatorConfig, SolverConfig};
pub use constants::Species;
pub use covariance::{CovarianceMatrix, Twiss};
pub use error::{EnvelopeError, Result};
pub use estimator::{CourantSnyderEstimator, EstimatorState, TransferMapGenerator, estimate_zero_current};
pub use field::{FieldModel, FieldProfile, RfDrive, TtfFit};
pub use lattice::{BeamLine, Element, SpaceCharge};
pub use logging::{LogConfig, init_logging};
pub use matrix::{Matrix2, SquareMatrix};
pub use metrics::{EnvelopeMeasurement, residual_error, synthesize_measurements};
pub use phase::{PhaseMatrix, PhasePlane, PhaseVector};
pub use probe::Probe;
pub use transfer::{IntegrationContext, LongitudinalFormula};
pub use vector::Vector;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
