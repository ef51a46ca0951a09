//! Cross-fill summary: per-fill accidental slope vs. integrated luminosity.
//!
//! Every fit-enabled file gets its own straight-line fit over a common SBIL
//! range; its slope is then placed at the fill's integrated luminosity, and
//! the resulting series is fit once more to track the slope's drift over the
//! year.

use crate::domain::{DerivedSample, FileDataset, FitModel, FitWeighting, Period, SlopePoint};
use crate::error::Diagnostic;
use crate::fit::linear::{fit_all, fit_period};
use crate::lookup::{FillLuminosityTable, JoinedLuminosity, join_luminosity, join_or_sentinel};

/// Default SBIL range for per-fill slope fits.
pub const DEFAULT_SLOPE_RANGE: Period = Period { start: 0.0, end: 9.0 };

#[derive(Debug, Clone, Default)]
pub struct SlopeSummary {
    /// One point per fit-enabled file whose fit succeeded, in file order.
    pub points: Vec<SlopePoint>,
    /// Linear fit of slope vs. luminosity over resolved points.
    pub fit: Option<FitModel>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Build the slope-vs-luminosity summary for `files`.
pub fn summarize_slopes(
    files: &[FileDataset],
    range: Period,
    weighting: FitWeighting,
    table: &FillLuminosityTable,
) -> SlopeSummary {
    let mut out = SlopeSummary::default();

    for file in files.iter().filter(|f| f.fit_enabled) {
        let fit = match fit_period(&file.samples, range, weighting) {
            Ok(fit) => fit,
            Err(e) => {
                log::warn!("{}: no slope: {e}", file.source);
                out.diagnostics.push(Diagnostic::new(file.source.clone(), e));
                continue;
            }
        };

        // File names carry the fill more reliably than display labels.
        let joined = match join_luminosity(&file.source, table) {
            Ok((fill, lumi)) => JoinedLuminosity {
                fill: Some(fill),
                integrated_luminosity: lumi,
                resolved: true,
            },
            Err(_) => join_or_sentinel(&file.label, table, &mut out.diagnostics),
        };

        out.points.push(SlopePoint {
            label: file.label.clone(),
            fill: joined.fill,
            integrated_luminosity: joined.integrated_luminosity,
            resolved: joined.resolved,
            slope: fit.slope,
            slope_error: fit.slope_error,
        });
    }

    let resolved: Vec<DerivedSample> = out
        .points
        .iter()
        .filter(|p| p.resolved)
        .map(|p| DerivedSample::new(p.integrated_luminosity, p.slope, p.slope_error))
        .collect();

    match fit_all(&resolved, weighting) {
        Ok(fit) => out.fit = Some(fit),
        Err(e) => {
            log::warn!("slope summary not fit: {e}");
            out.diagnostics.push(Diagnostic::new("slope summary", e));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::lookup::UNKNOWN_FILL_SENTINEL;

    fn fill_dataset(source: &str, label: &str, intercept: f64, slope: f64) -> FileDataset {
        let mut ds = FileDataset::empty(source, label, true);
        ds.samples = [1.0, 2.0, 3.0, 4.0, 12.0]
            .iter()
            .map(|&x| DerivedSample::new(x, intercept + slope * x, 0.1))
            .collect();
        ds
    }

    #[test]
    fn slopes_follow_luminosity_and_unknown_fills_are_excluded_from_fit() {
        let table = FillLuminosityTable::from_entries([(5154, 10.0), (5162, 20.0), (5173, 30.0)]);
        let mut disabled = fill_dataset("CombinedRates_5179.txt", "Fill 5179", 4.0, 9.0);
        disabled.fit_enabled = false;
        let files = vec![
            fill_dataset("CombinedRates_5154.txt", "Fill 5154", 4.0, 0.5),
            fill_dataset("CombinedRates_5162.txt", "Fill 5162", 4.0, 0.7),
            fill_dataset("CombinedRates_9999.txt", "Fill 9999", 4.0, 5.0),
            fill_dataset("CombinedRates_5173.txt", "Fill 5173", 4.0, 0.9),
            disabled,
        ];

        let summary = summarize_slopes(&files, DEFAULT_SLOPE_RANGE, FitWeighting::Uniform, &table);

        assert_eq!(summary.points.len(), 4);
        assert!((summary.points[0].slope - 0.5).abs() < 1e-9);
        assert_eq!(summary.points[2].fill, Some(9999));
        assert!(!summary.points[2].resolved);
        assert_eq!(summary.points[2].integrated_luminosity, UNKNOWN_FILL_SENTINEL);

        // Resolved slopes lie on 0.3 + 0.02 * lumi.
        let fit = summary.fit.as_ref().unwrap();
        assert_eq!(fit.n_points, 3);
        assert!((fit.slope - 0.02).abs() < 1e-9);
        assert!((fit.intercept - 0.3).abs() < 1e-9);

        assert_eq!(summary.diagnostics.len(), 1);
        assert!(matches!(summary.diagnostics[0].error, PipelineError::UnknownFill { .. }));
    }

    #[test]
    fn label_is_used_when_source_has_no_fill() {
        let table = FillLuminosityTable::from_entries([(4435, 3.5)]);
        let files = vec![fill_dataset("CombinedRates_MuScan_Central.txt", "Fill 4435 (mu scan)", 1.0, 1.0)];
        let summary = summarize_slopes(&files, DEFAULT_SLOPE_RANGE, FitWeighting::Uniform, &table);
        assert!(summary.points[0].resolved);
        assert_eq!(summary.points[0].fill, Some(4435));
        assert_eq!(summary.points[0].integrated_luminosity, 3.5);
    }

    #[test]
    fn failed_file_fit_is_reported_not_fatal() {
        let table = FillLuminosityTable::default();
        let mut sparse = FileDataset::empty("CombinedRates_5005.txt", "Fill 5005", true);
        sparse.samples.push(DerivedSample::new(1.0, 5.0, 0.1));
        let summary = summarize_slopes(&[sparse], DEFAULT_SLOPE_RANGE, FitWeighting::Uniform, &table);
        assert!(summary.points.is_empty());
        assert!(summary.fit.is_none());
        assert_eq!(summary.diagnostics.len(), 2);
    }
}
