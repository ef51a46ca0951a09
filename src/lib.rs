//! `plt-accidentals` library crate.
//!
//! The binary (`pltacc`) is a thin wrapper around this library so that:
//!
//! - the derivation and fitting logic is testable without spawning processes
//! - modules are reusable from notebooks or other front-ends
//! - code stays easy to navigate as the project grows

pub mod aggregate;
pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod lookup;
pub mod math;
pub mod rates;
pub mod report;
