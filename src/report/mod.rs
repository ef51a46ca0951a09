//! Reporting utilities: per-file summaries and formatted terminal output.

use crate::domain::FileDataset;
use crate::error::{Diagnostic, Severity};

pub mod format;

pub use format::*;

/// Compact description of one derived dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub label: String,
    pub source: String,
    pub n_samples: usize,
    /// `(min, max)` of `x` over the samples.
    pub x_range: Option<(f64, f64)>,
    pub time_span: Option<(i64, i64)>,
}

pub fn summarize_dataset(ds: &FileDataset) -> DatasetSummary {
    let x_range = ds.samples.iter().fold(None, |acc: Option<(f64, f64)>, s| match acc {
        None => Some((s.x, s.x)),
        Some((lo, hi)) => Some((lo.min(s.x), hi.max(s.x))),
    });
    DatasetSummary {
        label: ds.label.clone(),
        source: ds.source.clone(),
        n_samples: ds.samples.len(),
        x_range,
        time_span: ds.time_span,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounts {
    pub warnings: usize,
    pub errors: usize,
}

pub fn count_diagnostics(diagnostics: &[Diagnostic]) -> DiagnosticCounts {
    let mut counts = DiagnosticCounts::default();
    for d in diagnostics {
        match d.severity() {
            Severity::Warning => counts.warnings += 1,
            Severity::Error => counts.errors += 1,
        }
    }
    counts
}
