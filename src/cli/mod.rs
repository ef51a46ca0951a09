//! Command-line parsing for the PLT accidental-rate pipeline.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the derivation/fitting code.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::domain::{FitWeighting, Period};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pltacc", version, about = "PLT accidental-rate derivation and calibration fits")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Aggregate CombinedRates files, fit each file and the calibration periods.
    Rates(RatesArgs),
    /// Per-fill slopes joined with integrated luminosity, plus their trend fit.
    Slopes(SlopesArgs),
    /// Max-normalized per-side rates of scan files.
    Sides(SidesArgs),
    /// Period fits on a column-selected CSV series.
    Periods(PeriodsArgs),
    /// Write a synthetic CombinedRates file.
    Synth(SynthArgs),
}

/// Options shared by the config-driven commands.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Run configuration (JSON).
    #[arg(short = 'c', long)]
    pub config: PathBuf,

    /// Directory that relative source paths resolve against.
    ///
    /// Overrides `data_dir` in the config and `PLT_DATA_DIR`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Export the renderer bundle (JSON).
    #[arg(long)]
    pub export_bundle: Option<PathBuf>,

    /// Exit with status 5 when any error-severity diagnostic was collected.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RatesArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Export every derived sample to CSV.
    #[arg(long)]
    pub export_samples: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SlopesArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Fill -> integrated luminosity table (CSV `fill,int_lumi` or JSON).
    ///
    /// Overrides `luminosity_table` in the config.
    #[arg(long)]
    pub lumi_table: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SidesArgs {
    /// Scan files to normalize.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(long)]
    pub export_bundle: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PeriodsArgs {
    /// Input CSV.
    #[arg(long)]
    pub csv: PathBuf,

    /// 0-based column of x.
    #[arg(long)]
    pub x_col: usize,

    /// 0-based column of y.
    #[arg(long)]
    pub y_col: usize,

    /// 0-based column of the y error.
    #[arg(long)]
    pub err_col: Option<usize>,

    /// 0-based column naming each row's class; every class is also fit on its own.
    #[arg(long)]
    pub class_col: Option<usize>,

    /// Factor applied to y and its error.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Fixed calibration lines (JSON) to compare the series against.
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// The first row holds data, not column names.
    #[arg(long)]
    pub no_header: bool,

    /// Fit range as START:END (repeatable).
    #[arg(long = "period", required = true, value_parser = parse_period)]
    pub periods: Vec<Period>,

    #[arg(long, value_enum, default_value_t = FitWeighting::Uniform)]
    pub weighting: FitWeighting,

    #[arg(long)]
    pub export_bundle: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Output file.
    #[arg(short = 'o', long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 40)]
    pub steps: usize,

    #[arg(long, default_value_t = 2000)]
    pub bunches: u64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Accidental percentage at zero SBIL.
    #[arg(long, default_value_t = 4.0)]
    pub intercept: f64,

    /// Accidental percentage per unit SBIL.
    #[arg(long, default_value_t = 0.8)]
    pub slope: f64,

    /// SBIL of the first step.
    #[arg(long, default_value_t = 6.0)]
    pub peak_sbil: f64,

    /// Standard deviation of the accidental percentage noise.
    #[arg(long, default_value_t = 0.05)]
    pub noise: f64,
}

/// Parse `START:END` into a period.
pub fn parse_period(s: &str) -> Result<Period, String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got '{s}'"))?;
    let start = f64::from_str(a.trim()).map_err(|_| format!("invalid period start '{a}'"))?;
    let end = f64::from_str(b.trim()).map_err(|_| format!("invalid period end '{b}'"))?;
    if !(start.is_finite() && end.is_finite() && start < end) {
        return Err(format!("period '{s}' needs finite START < END"));
    }
    Ok(Period::new(start, end))
}
