//! Fill-number extraction and integrated-luminosity lookup.
//!
//! Input files and labels carry the LHC fill number somewhere in their name
//! (`CombinedRates_5154.txt`, `Fill 4266 (VdM scan)`). The first maximal run
//! of digits is taken as the fill and resolved against a
//! `FillLuminosityTable` that is loaded once from configuration data.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Diagnostic, PipelineError};

/// Value used in place of the luminosity of an unresolved fill.
pub const UNKNOWN_FILL_SENTINEL: f64 = 0.0;

/// Immutable fill -> cumulative integrated luminosity map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillLuminosityTable {
    entries: BTreeMap<u32, f64>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    fill: u32,
    int_lumi: f64,
}

impl FillLuminosityTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, f64)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, fill: u32) -> Option<f64> {
        self.entries.get(&fill).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a table, choosing the format by extension (`.csv` or `.json`).
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let file = File::open(path).map_err(|e| {
            AppError::new(
                2,
                format!("Failed to open luminosity table '{}': {e}", path.display()),
            )
        })?;

        let table = match ext.as_str() {
            "csv" => Self::from_csv_reader(file),
            "json" => Self::from_json_reader(file),
            other => Err(AppError::new(
                2,
                format!("Unsupported luminosity table extension: .{other} (expected .csv or .json)"),
            )),
        }?;

        log::info!("loaded {} fill(s) from {}", table.len(), path.display());
        Ok(table)
    }

    /// CSV with a `fill,int_lumi` header.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, AppError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut entries = BTreeMap::new();
        for (idx, row) in rdr.deserialize::<TableRow>().enumerate() {
            let row = row.map_err(|e| AppError::new(2, format!("Invalid luminosity table row {}: {e}", idx + 2)))?;
            if !row.int_lumi.is_finite() {
                return Err(AppError::new(
                    2,
                    format!("Non-finite luminosity for fill {}", row.fill),
                ));
            }
            entries.insert(row.fill, row.int_lumi);
        }
        Ok(Self { entries })
    }

    /// JSON object mapping fill numbers (as strings) to luminosity.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, AppError> {
        let raw: BTreeMap<String, f64> = serde_json::from_reader(reader)
            .map_err(|e| AppError::new(2, format!("Invalid luminosity table JSON: {e}")))?;
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            let fill: u32 = key
                .trim()
                .parse()
                .map_err(|_| AppError::new(2, format!("Invalid fill number '{key}' in luminosity table")))?;
            entries.insert(fill, value);
        }
        Ok(Self { entries })
    }
}

/// Extract the first maximal run of ASCII digits as a fill number.
pub fn extract_fill_number(label: &str) -> Result<u32, PipelineError> {
    let start = label.find(|c: char| c.is_ascii_digit()).ok_or_else(|| PipelineError::UnknownFill {
        label: label.to_string(),
        reason: "no digits in name".to_string(),
    })?;
    let digits: &str = {
        let rest = &label[start..];
        let len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        &rest[..len]
    };
    digits.parse().map_err(|_| PipelineError::UnknownFill {
        label: label.to_string(),
        reason: format!("fill number '{digits}' out of range"),
    })
}

/// Resolve a label to `(fill, integrated luminosity)`.
pub fn join_luminosity(label: &str, table: &FillLuminosityTable) -> Result<(u32, f64), PipelineError> {
    let fill = extract_fill_number(label)?;
    let lumi = table.get(fill).ok_or_else(|| PipelineError::UnknownFill {
        label: label.to_string(),
        reason: format!("fill {fill} not in luminosity table"),
    })?;
    Ok((fill, lumi))
}

/// Outcome of a tolerant join: the sentinel is substituted on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedLuminosity {
    pub fill: Option<u32>,
    pub integrated_luminosity: f64,
    pub resolved: bool,
}

/// Join, substituting `UNKNOWN_FILL_SENTINEL` and recording a diagnostic on failure.
pub fn join_or_sentinel(
    label: &str,
    table: &FillLuminosityTable,
    diagnostics: &mut Vec<Diagnostic>,
) -> JoinedLuminosity {
    match join_luminosity(label, table) {
        Ok((fill, lumi)) => JoinedLuminosity {
            fill: Some(fill),
            integrated_luminosity: lumi,
            resolved: true,
        },
        Err(e) => {
            log::warn!("{e}; using {UNKNOWN_FILL_SENTINEL}");
            diagnostics.push(Diagnostic::new(label, e));
            JoinedLuminosity {
                fill: extract_fill_number(label).ok(),
                integrated_luminosity: UNKNOWN_FILL_SENTINEL,
                resolved: false,
            }
        }
    }
}
