//! Calibration fitting.
//!
//! Responsibilities:
//!
//! - straight-line fits over independent x-ranges ("periods")
//! - piecewise evaluation of a set of period fits
//! - the per-fill slope vs. integrated-luminosity summary

pub mod linear;
pub mod summary;

pub use linear::*;
pub use summary::*;
