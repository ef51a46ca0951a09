//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - derivation/fitting code stays free of presentation concerns
//! - output changes are localized

use chrono::DateTime;

use crate::aggregate::Aggregation;
use crate::domain::{DerivedSample, FileDataset, FitModel, Period};
use crate::error::Diagnostic;
use crate::fit::{PeriodFits, PiecewiseCalibration, SlopeSummary};
use crate::io::{LabeledFit, TableSeries};
use crate::rates::SideRates;
use crate::report::{count_diagnostics, summarize_dataset};

/// Per-file table of an aggregation run.
pub fn format_aggregation(agg: &Aggregation) -> String {
    let mut out = String::new();

    out.push_str("=== pltacc - accidental rate vs. SBIL ===\n");
    out.push_str(&format!(
        "Sources: {} ({} usable) | samples: {}\n\n",
        agg.files.len(),
        agg.usable_files(),
        agg.combined.len()
    ));
    out.push_str(&format_datasets(&agg.files));
    out
}

/// Table of datasets with sample counts, x ranges and UTC time spans.
pub fn format_datasets(files: &[FileDataset]) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:<28} {:<26} {:>6} {:>17} {:<35}",
            "label", "source", "n", "x range", "time span (UTC)"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<28} {:-<26} {:-<6} {:-<17} {:-<35}", "", "", "", "", ""),
    );

    for ds in files {
        let s = summarize_dataset(ds);
        let range = match s.x_range {
            Some((lo, hi)) => format!("[{lo:.3}, {hi:.3}]"),
            None => "-".to_string(),
        };
        let span = s.time_span.map(fmt_span).unwrap_or_else(|| "-".to_string());
        push_row(
            &mut out,
            format!(
                "{:<28} {:<26} {:>6} {:>17} {:<35}",
                truncate(&s.label, 28),
                truncate(&s.source, 26),
                s.n_samples,
                range,
                span
            ),
        );
    }
    out
}

/// Table of labeled fits.
pub fn format_fits(title: &str, fits: &[LabeledFit]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{title}:\n"));
    if fits.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }
    push_fit_header(&mut out, "label");
    for f in fits {
        push_fit_row(&mut out, &truncate(&f.label, 28), &f.fit);
    }
    out
}

/// Period fits plus the periods that were skipped.
pub fn format_period_fits(fits: &PeriodFits) -> String {
    format_titled_period_fits("Period fits", fits)
}

/// Period fits of one class of a table series.
pub fn format_class_period_fits(class: &str, fits: &PeriodFits) -> String {
    format_titled_period_fits(&format!("Period fits, class {class}"), fits)
}

/// Fixed reference lines and how far the series sits from them.
pub fn format_reference(reference: &PiecewiseCalibration, residuals: &[DerivedSample]) -> String {
    let mut out = String::new();
    out.push_str("Reference calibration:\n");
    push_row(
        &mut out,
        format!("{:<28} {:>12} {:>12}", "period", "intercept", "slope"),
    );
    for f in reference.periods() {
        push_row(
            &mut out,
            format!("{:<28} {:>12.6} {:>12.6}", fmt_period(f.period()), f.intercept, f.slope),
        );
    }
    if residuals.is_empty() {
        out.push_str("  no samples inside the reference periods\n");
    } else {
        let n = residuals.len() as f64;
        let mean = residuals.iter().map(|r| r.y).sum::<f64>() / n;
        let rms = (residuals.iter().map(|r| r.y * r.y).sum::<f64>() / n).sqrt();
        out.push_str(&format!(
            "  residuals: {} sample(s), mean {mean:.5}, rms {rms:.5}\n",
            residuals.len()
        ));
    }
    out
}

fn format_titled_period_fits(title: &str, fits: &PeriodFits) -> String {
    let mut out = String::new();
    out.push_str(&format!("{title}:\n"));
    if !fits.fits.is_empty() {
        push_fit_header(&mut out, "period");
        for f in &fits.fits {
            push_fit_row(&mut out, &fmt_period(f.period()), f);
        }
    }
    for (period, reason) in &fits.skipped {
        out.push_str(&format!("  (skipped {}) {reason}\n", fmt_period(*period)));
    }
    if fits.fits.is_empty() && fits.skipped.is_empty() {
        out.push_str("  (none)\n");
    }
    out
}

/// Slope vs. integrated luminosity table and its fit.
pub fn format_slope_summary(summary: &SlopeSummary) -> String {
    let mut out = String::new();
    out.push_str("Slope vs. integrated luminosity:\n");
    push_row(
        &mut out,
        format!("{:<28} {:>6} {:>10} {:>12} {:>12}", "label", "fill", "lumi", "slope", "error"),
    );
    push_row(
        &mut out,
        format!("{:-<28} {:-<6} {:-<10} {:-<12} {:-<12}", "", "", "", "", ""),
    );
    for p in &summary.points {
        let fill = p.fill.map(|f| f.to_string()).unwrap_or_else(|| "?".to_string());
        let lumi = if p.resolved {
            format!("{:.3}", p.integrated_luminosity)
        } else {
            "unknown".to_string()
        };
        push_row(
            &mut out,
            format!(
                "{:<28} {:>6} {:>10} {:>12.6} {:>12.6}",
                truncate(&p.label, 28),
                fill,
                lumi,
                p.slope,
                p.slope_error
            ),
        );
    }

    match &summary.fit {
        Some(fit) => out.push_str(&format!(
            "\nSummary fit: slope = {} + {} * lumi (n={}, {})\n",
            fmt_pm(fit.intercept, fit.intercept_error),
            fmt_pm(fit.slope, fit.slope_error),
            fit.n_points,
            fmt_chi2(fit)
        )),
        None => out.push_str("\nSummary fit: not available\n"),
    }
    out
}

/// Normalized side-rate series of one scan.
pub fn format_side_rates(source: &str, rates: &SideRates) -> String {
    let mut out = String::new();
    out.push_str(&format!("Side rates: {source}\n"));
    out.push_str(&format_datasets(&rates.groups));
    out
}

pub fn format_table_series(series: &TableSeries) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Table: {} | rows: {} | samples: {} | skipped: {}\n",
        series.source,
        series.rows_read,
        series.samples.len(),
        series.row_errors.len()
    ));
    for e in &series.row_errors {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }
    out
}

/// Diagnostics, one per line, with a severity tally.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let counts = count_diagnostics(diagnostics);
    let mut out = String::new();
    out.push_str(&format!(
        "Diagnostics: {} error(s), {} warning(s)\n",
        counts.errors, counts.warnings
    ));
    for d in diagnostics {
        out.push_str(&format!("  {:<7} {d}\n", format!("{:?}", d.severity()).to_lowercase()));
    }
    out
}

fn push_fit_header(out: &mut String, first: &str) {
    push_row(
        out,
        format!(
            "{:<28} {:>24} {:>24} {:>6} {:>14}",
            first, "intercept", "slope", "n", "chi2/ndf"
        ),
    );
    push_row(
        out,
        format!("{:-<28} {:-<24} {:-<24} {:-<6} {:-<14}", "", "", "", "", ""),
    );
}

fn push_fit_row(out: &mut String, first: &str, fit: &FitModel) {
    push_row(
        out,
        format!(
            "{:<28} {:>24} {:>24} {:>6} {:>14}",
            first,
            fmt_pm(fit.intercept, fit.intercept_error),
            fmt_pm(fit.slope, fit.slope_error),
            fit.n_points,
            fmt_chi2(fit)
        ),
    );
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn fmt_pm(v: f64, err: f64) -> String {
    format!("{v:.5} +/- {err:.5}")
}

fn fmt_chi2(fit: &FitModel) -> String {
    format!("{:.3}/{}", fit.chi2, fit.ndf)
}

fn fmt_period(p: Period) -> String {
    format!("[{:.2}, {:.2}]", p.start, p.end)
}

fn fmt_span((begin, end): (i64, i64)) -> String {
    format!("{} .. {}", fmt_timestamp(begin), fmt_timestamp(end))
}

fn fmt_timestamp(ts: i64) -> String {
    match DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
