//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during derivation and fitting
//! - exported to JSON/CSV for the renderer
//! - reloaded later for comparisons

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One line of a CombinedRates file.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// 0-based position of the step within its file.
    pub step_index: usize,
    pub time_begin: i64,
    pub time_end: i64,
    pub trigger_count: u64,
    pub tracks_all: u64,
    /// Invariant: `tracks_good <= tracks_all` (enforced by the parser).
    pub tracks_good: u64,
    pub measurement_count: u64,
    pub total_luminosity: f64,
}

/// Number of readout channels in a side-rate scan line.
pub const CHANNEL_COUNT: usize = 16;

/// One line of a side-rate (VdM/imaging scan) file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStep {
    pub step_index: i64,
    pub time_begin: i64,
    pub time_end: i64,
    /// Beam separation at this step.
    pub separation: f64,
    /// Number of measurement units (nibbles) integrated in the step.
    pub measurement_count: f64,
    pub channel_counts: [u64; CHANNEL_COUNT],
}

/// A derived `(x, y, y_error)` point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedSample {
    pub x: f64,
    pub y: f64,
    pub y_error: f64,
}

impl DerivedSample {
    pub fn new(x: f64, y: f64, y_error: f64) -> Self {
        Self { x, y, y_error }
    }
}

/// Descriptor of one input file and how it takes part in the run.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Display label (e.g. "Fill 4266 (VdM scan)").
    pub label: String,
    /// Whether an individual fit is drawn for this file.
    pub fit_enabled: bool,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>, fit_enabled: bool) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            fit_enabled,
        }
    }

    /// File name component, used to name the source in diagnostics.
    pub fn source_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Derived samples of one source file / fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDataset {
    pub source: String,
    pub label: String,
    pub fit_enabled: bool,
    /// `(first time_begin, last time_end)` of the steps that produced samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_span: Option<(i64, i64)>,
    pub samples: Vec<DerivedSample>,
}

impl FileDataset {
    pub fn empty(source: impl Into<String>, label: impl Into<String>, fit_enabled: bool) -> Self {
        Self {
            source: source.into(),
            label: label.into(),
            fit_enabled,
            time_span: None,
            samples: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Concatenation of file datasets in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDataset {
    pub samples: Vec<DerivedSample>,
}

impl AggregatedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every sample of `file`, keeping its order.
    pub fn append(&mut self, file: &FileDataset) {
        self.samples.extend_from_slice(&file.samples);
    }

    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a FileDataset>) -> Self {
        let mut out = Self::new();
        for f in files {
            out.append(f);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Inclusive x-range over which one linear fit is performed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub start: f64,
    pub end: f64,
}

impl Period {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.start && x <= self.end
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// How observations are weighted in the least-squares objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FitWeighting {
    /// Ordinary least squares; errors scaled by the residual variance.
    #[default]
    Uniform,
    /// Weights `1 / y_error^2`; requires every sample in the period to carry
    /// a positive error, otherwise the fit falls back to `Uniform`.
    InverseVariance,
}

/// Result of one linear fit `y = intercept + slope * x` over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitModel {
    pub range_start: f64,
    pub range_end: f64,
    pub intercept: f64,
    pub slope: f64,
    pub intercept_error: f64,
    pub slope_error: f64,
    pub n_points: usize,
    /// Weighted residual sum of squares.
    pub chi2: f64,
    pub ndf: usize,
    /// Weighting actually applied (after any fallback).
    pub weighting: FitWeighting,
}

impl FitModel {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    pub fn period(&self) -> Period {
        Period::new(self.range_start, self.range_end)
    }
}

/// Per-fill slope joined with the fill's integrated luminosity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlopePoint {
    pub label: String,
    pub fill: Option<u32>,
    pub integrated_luminosity: f64,
    /// `false` when the luminosity is the sentinel substituted for an unknown fill.
    pub resolved: bool,
    pub slope: f64,
    pub slope_error: f64,
}
