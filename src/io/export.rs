//! Exports handed to the renderer.
//!
//! - a flat samples CSV (`source,label,x,y,y_error`), easy to load in
//!   spreadsheets or plotting scripts
//! - a JSON bundle with every series, fit and diagnostic of a run

use std::fs::File;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AggregatedDataset, FileDataset, FitModel, SlopePoint};
use crate::error::{AppError, Diagnostic, Severity};

#[derive(Debug, Serialize)]
struct SampleRow<'a> {
    source: &'a str,
    label: &'a str,
    x: f64,
    y: f64,
    y_error: f64,
}

/// Write every sample of `files` (in order) to a CSV file.
pub fn write_samples_csv(path: &Path, files: &[FileDataset]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(4, format!("Failed to create samples CSV '{}': {e}", path.display())))?;
    let mut wtr = csv::Writer::from_writer(file);

    for ds in files {
        for s in &ds.samples {
            wtr.serialize(SampleRow {
                source: &ds.source,
                label: &ds.label,
                x: s.x,
                y: s.y,
                y_error: s.y_error,
            })
            .map_err(|e| AppError::new(4, format!("Failed to write samples CSV row: {e}")))?;
        }
    }

    wtr.flush()
        .map_err(|e| AppError::new(4, format!("Failed to flush samples CSV: {e}")))?;
    Ok(())
}

/// A fit tagged with what it was fit to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledFit {
    pub label: String,
    pub fit: FitModel,
}

/// Serializable view of a `Diagnostic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub severity: String,
    pub kind: String,
    pub message: String,
}

impl From<&Diagnostic> for DiagnosticRecord {
    fn from(d: &Diagnostic) -> Self {
        let severity = match d.severity() {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        Self {
            source: d.source.clone(),
            step: d.step,
            severity: severity.to_string(),
            kind: d.error.kind().to_string(),
            message: d.error.to_string(),
        }
    }
}

/// Everything a renderer needs to draw one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderBundle {
    pub tool: String,
    pub generated_at: String,
    pub datasets: Vec<FileDataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<AggregatedDataset>,
    #[serde(default)]
    pub fits: Vec<LabeledFit>,
    #[serde(default)]
    pub slope_points: Vec<SlopePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope_fit: Option<FitModel>,
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticRecord>,
}

impl RenderBundle {
    pub fn new(datasets: Vec<FileDataset>) -> Self {
        Self {
            tool: concat!("pltacc ", env!("CARGO_PKG_VERSION")).to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            datasets,
            ..Self::default()
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: &[Diagnostic]) -> Self {
        self.diagnostics = diagnostics.iter().map(DiagnosticRecord::from).collect();
        self
    }
}

/// Write a bundle as pretty JSON.
pub fn write_bundle_json(path: &Path, bundle: &RenderBundle) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(4, format!("Failed to create bundle JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, bundle)
        .map_err(|e| AppError::new(4, format!("Failed to write bundle JSON: {e}")))?;
    Ok(())
}

/// Read a bundle back.
pub fn read_bundle_json(path: &Path) -> Result<RenderBundle, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open bundle JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid bundle JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DerivedSample, FitWeighting};
    use crate::error::PipelineError;

    fn dataset() -> FileDataset {
        let mut ds = FileDataset::empty("CombinedRates_4444.txt", "Fill 4444", true);
        ds.samples = vec![DerivedSample::new(1.5, 7.25, 0.1), DerivedSample::new(2.0, 8.0, 0.2)];
        ds
    }

    #[test]
    fn samples_csv_has_one_row_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        write_samples_csv(&path, &[dataset()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "source,label,x,y,y_error");
        assert_eq!(lines[1], "CombinedRates_4444.txt,Fill 4444,1.5,7.25,0.1");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn bundle_json_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");

        let fit = FitModel {
            range_start: 0.0,
            range_end: 2.3,
            intercept: 4.5,
            slope: 1.25,
            intercept_error: 0.1,
            slope_error: 0.05,
            n_points: 2,
            chi2: 0.0,
            ndf: 0,
            weighting: FitWeighting::Uniform,
        };
        let diag = Diagnostic::new(
            "CombinedRates_4266.txt",
            PipelineError::DivisionByZero {
                what: "tracksAll is zero".to_string(),
            },
        );
        let mut bundle = RenderBundle::new(vec![dataset()]).with_diagnostics(&[diag]);
        bundle.fits.push(LabeledFit {
            label: "Fill 4444".to_string(),
            fit,
        });

        write_bundle_json(&path, &bundle).unwrap();
        let back = read_bundle_json(&path).unwrap();
        assert_eq!(back, bundle);
        assert_eq!(back.diagnostics[0].kind, "division-by-zero");
        assert_eq!(back.diagnostics[0].severity, "warning");
    }
}
