//! Derivation of `(x, y, y_error)` samples from raw step records.
//!
//! - binomial accidental rates vs. SBIL (`accidental`)
//! - side-aggregated, max-normalized scan rates (`side`)

pub mod accidental;
pub mod side;

pub use accidental::*;
pub use side::*;
