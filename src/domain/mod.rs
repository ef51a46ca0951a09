//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw input records (`StepRecord`, `ScanStep`)
//! - derived series (`DerivedSample`, `FileDataset`, `AggregatedDataset`)
//! - fit inputs/outputs (`Period`, `FitWeighting`, `FitModel`, `SlopePoint`)

pub mod types;

pub use types::*;
