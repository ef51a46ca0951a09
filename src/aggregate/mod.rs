//! Cross-fill aggregation.
//!
//! Each source is parsed and derived independently (in parallel); results are
//! then concatenated in the caller's source order, so the aggregate is always
//! `file_1 ++ file_2 ++ ...` regardless of scheduling.
//!
//! A source that cannot be read contributes an empty dataset and a diagnostic;
//! it never stops the remaining sources from being processed.

use rayon::prelude::*;

use crate::domain::{AggregatedDataset, FileDataset, SourceSpec};
use crate::error::Diagnostic;
use crate::io::records::read_combined_rates;
use crate::rates::derive_file;

/// Output of one aggregation run.
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// One dataset per source, in source order (empty for failed sources).
    pub files: Vec<FileDataset>,
    pub combined: AggregatedDataset,
    pub diagnostics: Vec<Diagnostic>,
}

impl Aggregation {
    /// Sources that produced at least one sample.
    pub fn usable_files(&self) -> usize {
        self.files.iter().filter(|f| !f.is_empty()).count()
    }
}

/// Load one CombinedRates source into a dataset.
pub fn load_source(spec: &SourceSpec) -> (FileDataset, Vec<Diagnostic>) {
    match read_combined_rates(&spec.path) {
        Ok(parsed) => derive_file(&parsed, spec),
        Err(e) => {
            log::warn!("skipping {}: {e}", spec.path.display());
            (
                FileDataset::empty(spec.source_name(), spec.label.clone(), spec.fit_enabled),
                vec![Diagnostic::new(spec.source_name(), e)],
            )
        }
    }
}

/// Concatenate already-derived datasets, preserving order.
pub fn combine(files: Vec<FileDataset>, diagnostics: Vec<Diagnostic>) -> Aggregation {
    let combined = AggregatedDataset::from_files(&files);
    Aggregation {
        files,
        combined,
        diagnostics,
    }
}

/// Parse, derive and aggregate every source.
pub fn aggregate_sources(sources: &[SourceSpec]) -> Aggregation {
    let loaded: Vec<(FileDataset, Vec<Diagnostic>)> = sources.par_iter().map(load_source).collect();

    let mut files = Vec::with_capacity(loaded.len());
    let mut diagnostics = Vec::new();
    for (file, diags) in loaded {
        log::info!("{}: {} sample(s)", file.source, file.len());
        files.push(file);
        diagnostics.extend(diags);
    }

    combine(files, diagnostics)
}
