//! Accidental-rate derivation for CombinedRates steps.
//!
//! For each step:
//!
//! ```text
//! p      = (tracksAll - tracksGood) / tracksAll
//! y      = 100 * p
//! y_err  = 100 * sqrt(p * (1 - p) / tracksAll)
//! x      = totalLuminosity / (measurementCount * bunchCount)
//! ```
//!
//! i.e. the binomial proportion of accidental tracks (in percent) against
//! the per-bunch instantaneous luminosity (SBIL).

use crate::domain::{DerivedSample, FileDataset, SourceSpec, StepRecord};
use crate::error::{Diagnostic, PipelineError};
use crate::io::records::CombinedRatesFile;

/// Binomial proportion with its standard error, both as fractions.
pub fn binomial_proportion(failures: u64, trials: u64) -> Result<(f64, f64), PipelineError> {
    if trials == 0 {
        return Err(PipelineError::DivisionByZero {
            what: "tracksAll is zero".to_string(),
        });
    }
    let n = trials as f64;
    let p = failures as f64 / n;
    let err = (p * (1.0 - p) / n).sqrt();
    Ok((p, err))
}

/// Derive one `(SBIL, accidental %, error)` sample from a step.
pub fn derive_accidental(record: &StepRecord, bunch_count: u64) -> Result<DerivedSample, PipelineError> {
    let denom = record.measurement_count.saturating_mul(bunch_count);
    if denom == 0 {
        return Err(PipelineError::DivisionByZero {
            what: format!(
                "measurementCount ({}) * bunchCount ({bunch_count}) is zero",
                record.measurement_count
            ),
        });
    }

    let accidental = record
        .tracks_all
        .checked_sub(record.tracks_good)
        .ok_or_else(|| PipelineError::MalformedRecord {
            source_name: format!("step {}", record.step_index),
            line: 0,
            reason: format!(
                "tracksGood ({}) exceeds tracksAll ({})",
                record.tracks_good, record.tracks_all
            ),
        })?;
    let (rate, rate_err) = binomial_proportion(accidental, record.tracks_all)?;

    Ok(DerivedSample {
        x: record.total_luminosity / denom as f64,
        y: 100.0 * rate,
        y_error: 100.0 * rate_err,
    })
}

/// Derive every step of a parsed file into a `FileDataset`.
///
/// Steps that cannot be derived are left out and reported as diagnostics;
/// a parse error carried by `parsed` is reported too.
pub fn derive_file(parsed: &CombinedRatesFile, spec: &SourceSpec) -> (FileDataset, Vec<Diagnostic>) {
    let mut dataset = FileDataset::empty(parsed.source.clone(), spec.label.clone(), spec.fit_enabled);
    let mut diagnostics = Vec::new();

    if let Some(err) = &parsed.error {
        log::warn!(
            "{}: keeping {} record(s) read before: {err}",
            parsed.source,
            parsed.records.len()
        );
        diagnostics.push(Diagnostic::new(parsed.source.clone(), err.clone()));
    }

    let mut first_begin: Option<i64> = None;
    let mut last_end: Option<i64> = None;

    for record in &parsed.records {
        match derive_accidental(record, parsed.bunch_count) {
            Ok(sample) => {
                dataset.samples.push(sample);
                first_begin.get_or_insert(record.time_begin);
                last_end = Some(record.time_end);
            }
            Err(e) => {
                log::warn!("{}: step {} excluded: {e}", parsed.source, record.step_index);
                diagnostics.push(Diagnostic::at_step(parsed.source.clone(), record.step_index, e));
            }
        }
    }

    dataset.time_span = first_begin.zip(last_end);
    (dataset, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::records::parse_combined_rates;

    fn record(tracks_all: u64, tracks_good: u64) -> StepRecord {
        StepRecord {
            step_index: 0,
            time_begin: 0,
            time_end: 1,
            trigger_count: 100,
            tracks_all,
            tracks_good,
            measurement_count: 5,
            total_luminosity: 500.0,
        }
    }

    #[test]
    fn example_steps_match_reference_values() {
        let text = "2 10\n0 1 100 1000 950 5 500.0\n1 2 100 1000 900 5 500.0";
        let parsed = parse_combined_rates(text.as_bytes(), "example").unwrap();
        let a = derive_accidental(&parsed.records[0], parsed.bunch_count).unwrap();
        let b = derive_accidental(&parsed.records[1], parsed.bunch_count).unwrap();

        assert!((a.x - 10.0).abs() < 1e-12);
        assert!((b.x - 10.0).abs() < 1e-12);
        assert!((a.y - 5.0).abs() < 1e-12);
        assert!((b.y - 10.0).abs() < 1e-12);
        assert!((a.y_error - 0.689).abs() < 1e-3, "got {}", a.y_error);
        assert!((b.y_error - 0.949).abs() < 1e-3, "got {}", b.y_error);
    }

    #[test]
    fn rate_and_error_follow_binomial_formula() {
        for &(t, g) in &[(1u64, 0u64), (1, 1), (7, 3), (1000, 999), (250_000, 230_117), (12, 12)] {
            let s = derive_accidental(&record(t, g), 1).unwrap();
            let tf = t as f64;
            let p = (t - g) as f64 / tf;
            let expected_err = 100.0 * (p * (g as f64 / tf) / tf).sqrt();
            assert!((s.y - 100.0 * p).abs() < 1e-9);
            assert!((s.y_error - expected_err).abs() < 1e-9);
            assert!(s.y >= 0.0 && s.y <= 100.0);
            assert!(s.y_error >= 0.0);
        }
    }

    #[test]
    fn zero_tracks_is_division_by_zero() {
        let err = derive_accidental(&record(0, 0), 10).unwrap_err();
        assert!(matches!(err, PipelineError::DivisionByZero { .. }));
    }

    #[test]
    fn zero_bunches_is_division_by_zero() {
        let err = derive_accidental(&record(10, 5), 0).unwrap_err();
        assert!(matches!(err, PipelineError::DivisionByZero { .. }));
    }

    #[test]
    fn hand_built_record_with_excess_good_tracks_is_malformed() {
        let err = derive_accidental(&record(1000, 1001), 10).unwrap_err();
        match err {
            PipelineError::MalformedRecord { reason, .. } => {
                assert_eq!(reason, "tracksGood (1001) exceeds tracksAll (1000)");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn derive_file_excludes_bad_steps_and_keeps_order() {
        let text = "3 2\n10 20 1 100 90 1 4.0\n20 30 1 0 0 1 4.0\n30 40 1 100 80 1 8.0";
        let parsed = parse_combined_rates(text.as_bytes(), "f").unwrap();
        let spec = SourceSpec::new("f", "Fill f", true);
        let (ds, diags) = derive_file(&parsed, &spec);

        assert_eq!(ds.len(), 2);
        assert!((ds.samples[0].y - 10.0).abs() < 1e-12);
        assert!((ds.samples[1].y - 20.0).abs() < 1e-12);
        assert!((ds.samples[1].x - 4.0).abs() < 1e-12);
        assert_eq!(ds.time_span, Some((10, 40)));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].step, Some(1));
    }
}
