//! Error types.
//!
//! Two layers:
//!
//! - `PipelineError`: typed, recoverable failures raised by the ingest /
//!   derivation / fit components. None of them aborts a run; callers turn them
//!   into `Diagnostic`s and keep going.
//! - `AppError`: fatal errors for the binary (bad config, unwritable export),
//!   carrying the process exit code.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Recoverable failure of a single pipeline step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("cannot read source '{}': {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("{source_name}:{line}: malformed record: {reason}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("division by zero: {what}")]
    DivisionByZero { what: String },

    #[error("cannot normalize {group} series: all values are zero")]
    DegenerateNormalization { group: String },

    #[error("period [{start}, {end}] holds {found} sample(s); at least 2 are needed")]
    InsufficientData { start: f64, end: f64, found: usize },

    #[error("period [{start}, {end}]: all samples share one x value")]
    DegenerateFit { start: f64, end: f64 },

    #[error("unknown fill for '{label}': {reason}")]
    UnknownFill { label: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl PipelineError {
    /// Losing a whole file (or its tail) counts as an error; everything else
    /// only drops a sample, a period or a join.
    pub fn severity(&self) -> Severity {
        match self {
            PipelineError::SourceUnavailable { .. } | PipelineError::MalformedRecord { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "source-unavailable",
            PipelineError::MalformedRecord { .. } => "malformed-record",
            PipelineError::DivisionByZero { .. } => "division-by-zero",
            PipelineError::DegenerateNormalization { .. } => "degenerate-normalization",
            PipelineError::InsufficientData { .. } => "insufficient-data",
            PipelineError::DegenerateFit { .. } => "degenerate-fit",
            PipelineError::UnknownFill { .. } => "unknown-fill",
        }
    }
}

/// A surfaced, non-fatal problem tied to one source (and optionally one step).
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub source: String,
    pub step: Option<usize>,
    pub error: PipelineError,
}

impl Diagnostic {
    pub fn new(source: impl Into<String>, error: PipelineError) -> Self {
        Self {
            source: source.into(),
            step: None,
            error,
        }
    }

    pub fn at_step(source: impl Into<String>, step: usize, error: PipelineError) -> Self {
        Self {
            source: source.into(),
            step: Some(step),
            error,
        }
    }

    pub fn severity(&self) -> Severity {
        self.error.severity()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{}] step {step}: {}", self.source, self.error),
            None => write!(f, "[{}] {}", self.source, self.error),
        }
    }
}

/// Fatal error for the `pltacc` binary.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_splits_file_level_from_sample_level() {
        let missing = PipelineError::SourceUnavailable {
            path: PathBuf::from("x.txt"),
            reason: "gone".to_string(),
        };
        let zero = PipelineError::DivisionByZero {
            what: "tracksAll".to_string(),
        };
        assert_eq!(missing.severity(), Severity::Error);
        assert_eq!(zero.severity(), Severity::Warning);
    }

    #[test]
    fn diagnostic_display_names_source_and_step() {
        let d = Diagnostic::at_step(
            "CombinedRates_4201.txt",
            3,
            PipelineError::DivisionByZero {
                what: "tracksAll".to_string(),
            },
        );
        assert_eq!(
            d.to_string(),
            "[CombinedRates_4201.txt] step 3: division by zero: tracksAll"
        );
    }
}
