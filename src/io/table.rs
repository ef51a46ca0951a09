//! Column-selected series from spreadsheet CSV exports.
//!
//! Some calibration inputs (PLT/RAMSES ratios and slopes, emittance-scan
//! cross sections) arrive as CSV exports of spreadsheets. This reader picks an
//! `x` column, a `y` column and optionally a `y` error column by index, scales
//! `y`/`y_error` by a constant, and skips rows that do not parse (reporting
//! them, in the same spirit as row-level validation in the step parser).
//!
//! An optional class column splits the rows into independent series, e.g.
//! leading and train bunches of an emittance scan, each fit on its own.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::DerivedSample;
use crate::error::PipelineError;

/// Which columns form the series and how `y` is scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSelection {
    pub x_col: usize,
    pub y_col: usize,
    pub err_col: Option<usize>,
    /// Column whose value names the row's class.
    pub class_col: Option<usize>,
    pub scale: f64,
    pub has_header: bool,
}

impl ColumnSelection {
    pub fn new(x_col: usize, y_col: usize) -> Self {
        Self {
            x_col,
            y_col,
            err_col: None,
            class_col: None,
            scale: 1.0,
            has_header: true,
        }
    }
}

/// A row that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TableSeries {
    pub source: String,
    pub samples: Vec<DerivedSample>,
    /// Class of each sample, index-aligned with `samples`; empty without a class column.
    pub classes: Vec<String>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// The samples of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSeries {
    pub class: String,
    pub samples: Vec<DerivedSample>,
}

impl TableSeries {
    /// Split the samples by class, ordered by class label.
    ///
    /// Without a class column this is empty.
    pub fn by_class(&self) -> Vec<ClassSeries> {
        let mut groups: BTreeMap<&str, Vec<DerivedSample>> = BTreeMap::new();
        for (class, sample) in self.classes.iter().zip(&self.samples) {
            groups.entry(class.as_str()).or_default().push(*sample);
        }
        groups
            .into_iter()
            .map(|(class, samples)| ClassSeries {
                class: class.to_string(),
                samples,
            })
            .collect()
    }
}

/// Read a table series from a CSV file.
pub fn read_table_series(path: &Path, selection: &ColumnSelection) -> Result<TableSeries, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let source = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(parse_table_series(file, &source, selection))
}

/// Read a table series from any reader.
pub fn parse_table_series<R: Read>(reader: R, source: &str, selection: &ColumnSelection) -> TableSeries {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(selection.has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let first_line = if selection.has_header { 2 } else { 1 };
    let mut out = TableSeries {
        source: source.to_string(),
        samples: Vec::new(),
        classes: Vec::new(),
        row_errors: Vec::new(),
        rows_read: 0,
    };

    for (idx, result) in rdr.records().enumerate() {
        // Blank lines are skipped by the reader, so count from its positions.
        let position = match &result {
            Ok(r) => r.position(),
            Err(e) => e.position(),
        };
        let line = position.map(|p| p.line() as usize).unwrap_or(idx + first_line);
        out.rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        match parse_row(&record, selection) {
            Ok((sample, class)) => {
                out.samples.push(sample);
                if let Some(class) = class {
                    out.classes.push(class);
                }
            }
            Err(message) => out.row_errors.push(RowError { line, message }),
        }
    }

    if !out.row_errors.is_empty() {
        log::warn!("{source}: skipped {} of {} row(s)", out.row_errors.len(), out.rows_read);
    }
    out
}

fn parse_row(record: &StringRecord, sel: &ColumnSelection) -> Result<(DerivedSample, Option<String>), String> {
    let x = get_f64(record, sel.x_col)?;
    let y = get_f64(record, sel.y_col)?;
    let y_error = match sel.err_col {
        Some(col) => get_f64(record, col)?,
        None => 0.0,
    };
    let class = match sel.class_col {
        Some(col) => Some(get_str(record, col)?.to_string()),
        None => None,
    };
    Ok((DerivedSample::new(x, y * sel.scale, (y_error * sel.scale).abs()), class))
}

fn get_str(record: &StringRecord, col: usize) -> Result<&str, String> {
    record
        .get(col)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing column {col}"))
}

fn get_f64(record: &StringRecord, col: usize) -> Result<f64, String> {
    let raw = get_str(record, col)?;
    let v: f64 = raw
        .parse()
        .map_err(|_| format!("column {col}: invalid number '{raw}'"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("column {col}: non-finite value '{raw}'"))
    }
}
