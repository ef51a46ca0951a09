//! Run configuration.
//!
//! A run is described by a JSON file listing the input sources and the fit
//! settings. Relative source paths are resolved against a data directory
//! chosen by precedence: `--data-dir` flag, then `data_dir` in the config
//! file, then `PLT_DATA_DIR` (environment or `.env`), then the current
//! directory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{FitWeighting, Period, SourceSpec};
use crate::error::AppError;
use crate::fit::{DEFAULT_SLOPE_RANGE, PeriodLine, PiecewiseCalibration};

/// Environment variable naming the default data directory.
pub const DATA_DIR_ENV: &str = "PLT_DATA_DIR";

/// SBIL range of the per-file fits when the config does not set one.
pub const DEFAULT_FIT_RANGE: Period = Period { start: 0.0, end: 6.0 };

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    pub file: PathBuf,
    /// Defaults to the file stem.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub fit: bool,
}

fn default_true() -> bool {
    true
}

fn default_fit_range() -> Period {
    DEFAULT_FIT_RANGE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    pub sources: Vec<SourceEntry>,
    #[serde(default = "default_fit_range")]
    pub fit_range: Period,
    /// Also fit one line to the aggregate of all sources.
    #[serde(default)]
    pub fit_all: bool,
    /// Calibration periods fitted on the aggregate.
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub weighting: FitWeighting,
    #[serde(default)]
    pub luminosity_table: Option<PathBuf>,
    #[serde(default)]
    pub slope_range: Option<Period>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open config '{}': {e}", path.display())))?;
        Self::from_reader(file).map_err(|e| AppError::new(2, format!("{}: {e}", path.display())))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AppError> {
        let config: Self =
            serde_json::from_reader(reader).map_err(|e| AppError::new(2, format!("Invalid run config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::new(2, "Run config lists no sources."));
        }
        check_period("fit_range", self.fit_range)?;
        if let Some(range) = self.slope_range {
            check_period("slope_range", range)?;
        }
        for (i, p) in self.periods.iter().enumerate() {
            check_period(&format!("periods[{i}]"), *p)?;
        }
        Ok(())
    }

    pub fn slope_range(&self) -> Period {
        self.slope_range.unwrap_or(DEFAULT_SLOPE_RANGE)
    }

    /// Build source descriptors, resolving relative paths against `data_dir`.
    pub fn source_specs(&self, data_dir: &Path) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|s| {
                let label = s.label.clone().unwrap_or_else(|| {
                    s.file
                        .file_stem()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| s.file.display().to_string())
                });
                SourceSpec::new(resolve_path(data_dir, &s.file), label, s.fit)
            })
            .collect()
    }

    pub fn luminosity_table_path(&self, data_dir: &Path) -> Option<PathBuf> {
        self.luminosity_table.as_deref().map(|p| resolve_path(data_dir, p))
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Fixed calibration lines (JSON), e.g. published per-period fits.
///
/// ```json
/// {"scale": 100.0, "periods": [[4.387, 23.176, -0.0013287, -0.0002726]]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationFile {
    /// Multiplies every intercept and slope.
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub periods: Vec<PeriodLine>,
}

impl CalibrationFile {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open calibration '{}': {e}", path.display())))?;
        Self::from_reader(file).map_err(|e| AppError::new(2, format!("{}: {e}", path.display())))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AppError> {
        let file: Self =
            serde_json::from_reader(reader).map_err(|e| AppError::new(2, format!("Invalid calibration: {e}")))?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.periods.is_empty() {
            return Err(AppError::new(2, "Calibration lists no periods."));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(AppError::new(2, format!("Invalid calibration scale {}.", self.scale)));
        }
        for (i, p) in self.periods.iter().enumerate() {
            check_period(&format!("calibration periods[{i}]"), p.period())?;
            if !(p.intercept.is_finite() && p.slope.is_finite()) {
                return Err(AppError::new(
                    2,
                    format!("Invalid calibration periods[{i}]: non-finite parameters."),
                ));
            }
        }
        Ok(())
    }

    pub fn calibration(&self) -> PiecewiseCalibration {
        PiecewiseCalibration::from_parameters(&self.periods, self.scale)
    }
}

fn check_period(name: &str, p: Period) -> Result<(), AppError> {
    if p.start.is_finite() && p.end.is_finite() && p.start < p.end {
        Ok(())
    } else {
        Err(AppError::new(2, format!("Invalid {name} {p}: need finite start < end.")))
    }
}

pub fn resolve_path(data_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() { p.to_path_buf() } else { data_dir.join(p) }
}

/// `PLT_DATA_DIR`, after loading `.env` if present.
pub fn data_dir_from_env() -> Option<PathBuf> {
    dotenvy::dotenv().ok();
    std::env::var_os(DATA_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Pick the data directory by precedence: flag > config > env > cwd.
pub fn resolve_data_dir(flag: Option<&Path>, config: Option<&Path>, env: Option<PathBuf>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.map(Path::to_path_buf))
        .or(env)
        .unwrap_or_else(|| PathBuf::from("."))
}
