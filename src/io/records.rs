//! Parsers for the fixed-schema measurement files.
//!
//! Two line grammars are supported:
//!
//! - **CombinedRates**: a header `stepCount bunchCount` followed by
//!   `stepCount` lines of
//!   `timeBegin timeEnd triggerCount tracksAll tracksGood measurementCount totalLuminosity`
//! - **side rates**: free-form scan lines
//!   `stepIndex tsStart tsEnd separation measurementCount ch0 .. ch15`
//!
//! In both grammars blank lines and lines starting with `#` or `=` are skipped.
//!
//! Failure policy:
//! - unreadable source -> `SourceUnavailable` (the caller skips the file)
//! - malformed line -> parsing stops, records read so far are kept, and the
//!   `MalformedRecord` error travels alongside them

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::domain::{CHANNEL_COUNT, ScanStep, StepRecord};
use crate::error::PipelineError;

const COMBINED_FIELDS: usize = 7;
const SCAN_FIELDS: usize = 5 + CHANNEL_COUNT;

/// Upper bound on preallocated records; the header count is untrusted.
const MAX_PREALLOCATED_STEPS: usize = 4096;

/// Parsed CombinedRates file (possibly partial).
#[derive(Debug, Clone)]
pub struct CombinedRatesFile {
    pub source: String,
    pub bunch_count: u64,
    pub declared_steps: usize,
    pub records: Vec<StepRecord>,
    /// Set when parsing stopped early; `records` holds what was read before.
    pub error: Option<PipelineError>,
}

/// Parsed side-rate scan file (possibly partial).
#[derive(Debug, Clone)]
pub struct ScanFile {
    pub source: String,
    pub steps: Vec<ScanStep>,
    pub error: Option<PipelineError>,
}

/// Open and parse a CombinedRates file.
pub fn read_combined_rates(path: &Path) -> Result<CombinedRatesFile, PipelineError> {
    let file = open_source(path)?;
    parse_combined_rates(BufReader::new(file), &source_name(path))
}

/// Parse CombinedRates content from any buffered reader.
///
/// Returns `Err` only when no record can be produced at all (bad header);
/// mid-file problems are reported through `CombinedRatesFile::error`.
pub fn parse_combined_rates<R: BufRead>(reader: R, source: &str) -> Result<CombinedRatesFile, PipelineError> {
    let mut lines = data_lines(reader, source);

    let (header_line, header) = match lines.next() {
        Some(Ok(l)) => l,
        Some(Err(e)) => return Err(e),
        None => return Err(malformed(source, 0, "missing `stepCount bunchCount` header")),
    };
    let tokens: Vec<&str> = header.split_whitespace().collect();
    if tokens.len() != 2 {
        return Err(malformed(
            source,
            header_line,
            format!("header needs 2 fields (stepCount bunchCount), found {}", tokens.len()),
        ));
    }
    let declared_steps: usize = parse_field(tokens[0], "stepCount", source, header_line)?;
    let bunch_count: u64 = parse_field(tokens[1], "bunchCount", source, header_line)?;

    let mut out = CombinedRatesFile {
        source: source.to_string(),
        bunch_count,
        declared_steps,
        records: Vec::with_capacity(declared_steps.min(MAX_PREALLOCATED_STEPS)),
        error: None,
    };

    while out.records.len() < declared_steps {
        let (line_no, line) = match lines.next() {
            Some(Ok(l)) => l,
            Some(Err(e)) => {
                out.error = Some(e);
                return Ok(out);
            }
            None => break,
        };
        match parse_step_record(&line, out.records.len(), source, line_no) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                out.error = Some(e);
                return Ok(out);
            }
        }
    }

    if out.records.len() < declared_steps {
        out.error = Some(malformed(
            source,
            0,
            format!(
                "expected {declared_steps} steps, found {}",
                out.records.len()
            ),
        ));
    } else if let Some(Ok((line_no, _))) = lines.next() {
        log::debug!("{source}: ignoring content after {declared_steps} declared steps (line {line_no})");
    }

    Ok(out)
}

fn parse_step_record(line: &str, step_index: usize, source: &str, line_no: usize) -> Result<StepRecord, PipelineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != COMBINED_FIELDS {
        return Err(malformed(
            source,
            line_no,
            format!("expected {COMBINED_FIELDS} fields, found {}", tokens.len()),
        ));
    }

    let record = StepRecord {
        step_index,
        time_begin: parse_field(tokens[0], "timeBegin", source, line_no)?,
        time_end: parse_field(tokens[1], "timeEnd", source, line_no)?,
        trigger_count: parse_field(tokens[2], "triggerCount", source, line_no)?,
        tracks_all: parse_field(tokens[3], "tracksAll", source, line_no)?,
        tracks_good: parse_field(tokens[4], "tracksGood", source, line_no)?,
        measurement_count: parse_field(tokens[5], "measurementCount", source, line_no)?,
        total_luminosity: parse_float(tokens[6], "totalLuminosity", source, line_no)?,
    };

    if record.tracks_good > record.tracks_all {
        return Err(malformed(
            source,
            line_no,
            format!(
                "tracksGood ({}) exceeds tracksAll ({})",
                record.tracks_good, record.tracks_all
            ),
        ));
    }

    Ok(record)
}

/// Open and parse a side-rate scan file.
pub fn read_scan_rates(path: &Path) -> Result<ScanFile, PipelineError> {
    let file = open_source(path)?;
    Ok(parse_scan_rates(BufReader::new(file), &source_name(path)))
}

/// Parse side-rate scan content from any buffered reader.
pub fn parse_scan_rates<R: BufRead>(reader: R, source: &str) -> ScanFile {
    let mut out = ScanFile {
        source: source.to_string(),
        steps: Vec::new(),
        error: None,
    };

    for item in data_lines(reader, source) {
        let parsed = item.and_then(|(line_no, line)| parse_scan_step(&line, source, line_no));
        match parsed {
            Ok(step) => out.steps.push(step),
            Err(e) => {
                out.error = Some(e);
                break;
            }
        }
    }

    out
}

fn parse_scan_step(line: &str, source: &str, line_no: usize) -> Result<ScanStep, PipelineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != SCAN_FIELDS {
        return Err(malformed(
            source,
            line_no,
            format!("expected {SCAN_FIELDS} fields, found {}", tokens.len()),
        ));
    }

    let mut channel_counts = [0u64; CHANNEL_COUNT];
    for (ch, tok) in tokens[5..].iter().enumerate() {
        channel_counts[ch] = parse_field(tok, "channel count", source, line_no)?;
    }

    Ok(ScanStep {
        step_index: parse_field(tokens[0], "stepIndex", source, line_no)?,
        time_begin: parse_field(tokens[1], "tsStart", source, line_no)?,
        time_end: parse_field(tokens[2], "tsEnd", source, line_no)?,
        separation: parse_float(tokens[3], "separation", source, line_no)?,
        measurement_count: parse_float(tokens[4], "measurementCount", source, line_no)?,
        channel_counts,
    })
}

/// Iterate `(1-based line number, line)` over lines that carry data.
fn data_lines<R: BufRead>(
    reader: R,
    source: &str,
) -> impl Iterator<Item = Result<(usize, String), PipelineError>> {
    let source = source.to_string();
    reader
        .lines()
        .enumerate()
        .filter_map(move |(idx, line)| match line {
            Ok(l) => {
                let trimmed = l.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('=') {
                    None
                } else {
                    Some(Ok((idx + 1, l)))
                }
            }
            Err(e) => Some(Err(malformed(&source, idx + 1, format!("read error: {e}")))),
        })
}

fn open_source(path: &Path) -> Result<File, PipelineError> {
    File::open(path).map_err(|e| PipelineError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn parse_field<T: FromStr>(tok: &str, name: &str, source: &str, line: usize) -> Result<T, PipelineError> {
    tok.parse::<T>()
        .map_err(|_| malformed(source, line, format!("invalid {name} '{tok}'")))
}

fn parse_float(tok: &str, name: &str, source: &str, line: usize) -> Result<f64, PipelineError> {
    let v: f64 = parse_field(tok, name, source, line)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(malformed(source, line, format!("non-finite {name} '{tok}'")))
    }
}

fn malformed(source: &str, line: usize, reason: impl Into<String>) -> PipelineError {
    PipelineError::MalformedRecord {
        source_name: source.to_string(),
        line,
        reason: reason.into(),
    }
}
