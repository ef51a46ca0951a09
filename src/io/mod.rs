//! Input/output helpers.
//!
//! - measurement file parsers (`records`)
//! - CSV column series (`table`)
//! - samples CSV / renderer JSON exports (`export`)

pub mod export;
pub mod records;
pub mod table;

pub use export::*;
pub use records::*;
pub use table::*;
