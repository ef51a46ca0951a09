//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - resolves the run configuration and data directory
//! - runs the requested pipeline
//! - prints reports
//! - writes optional exports

use std::path::PathBuf;

use clap::Parser;

use crate::cli::{Command, PeriodsArgs, RatesArgs, RunArgs, SidesArgs, SlopesArgs, SynthArgs};
use crate::config::{CalibrationFile, RunConfig, data_dir_from_env, resolve_data_dir};
use crate::data::{SynthConfig, generate_fill, write_fill_file};
use crate::error::{AppError, Diagnostic};
use crate::io::{ColumnSelection, RenderBundle, write_bundle_json, write_samples_csv};
use crate::report::{
    count_diagnostics, format_aggregation, format_class_period_fits, format_diagnostics, format_fits, format_period_fits,
    format_reference, format_side_rates, format_slope_summary, format_table_series,
};

pub mod pipeline;

/// Entry point for the `pltacc` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Rates(args) => handle_rates(args),
        Command::Slopes(args) => handle_slopes(args),
        Command::Sides(args) => handle_sides(args),
        Command::Periods(args) => handle_periods(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_rates(args: RatesArgs) -> Result<(), AppError> {
    let (config, data_dir) = load_run(&args.run)?;
    let run = pipeline::run_rates(&config, &data_dir)?;

    println!("{}", format_aggregation(&run.aggregation));
    println!(
        "{}",
        format_fits(&format!("Per-file fits over {}", config.fit_range), &run.file_fits)
    );
    if let Some(fit) = &run.all_fit {
        let all = [crate::io::LabeledFit {
            label: "all fills".to_string(),
            fit: fit.clone(),
        }];
        println!("{}", format_fits("Fit to all fills", &all));
    }
    if !config.periods.is_empty() {
        println!("{}", format_period_fits(&run.period_fits));
    }
    println!("{}", format_diagnostics(&run.diagnostics));

    if let Some(path) = &args.export_samples {
        write_samples_csv(path, &run.aggregation.files)?;
        log::info!("wrote samples to {}", path.display());
    }
    export_bundle(args.run.export_bundle.as_ref(), &run.bundle())?;

    check_strict(args.run.strict, &run.diagnostics)
}

fn handle_slopes(args: SlopesArgs) -> Result<(), AppError> {
    let (config, data_dir) = load_run(&args.run)?;
    let run = pipeline::run_slopes(&config, &data_dir, args.lumi_table.as_deref())?;

    println!("{}", format_aggregation(&run.aggregation));
    println!("{}", format_slope_summary(&run.summary));
    println!("{}", format_diagnostics(&run.diagnostics));

    export_bundle(args.run.export_bundle.as_ref(), &run.bundle())?;
    check_strict(args.run.strict, &run.diagnostics)
}

fn handle_sides(args: SidesArgs) -> Result<(), AppError> {
    let run = pipeline::run_sides(&args.files)?;

    for (source, rates) in &run.scans {
        println!("{}", format_side_rates(source, rates));
    }
    println!("{}", format_diagnostics(&run.diagnostics));

    export_bundle(args.export_bundle.as_ref(), &run.bundle())
}

fn handle_periods(args: PeriodsArgs) -> Result<(), AppError> {
    let selection = ColumnSelection {
        x_col: args.x_col,
        y_col: args.y_col,
        err_col: args.err_col,
        class_col: args.class_col,
        scale: args.scale,
        has_header: !args.no_header,
    };
    let reference = args.reference.as_deref().map(CalibrationFile::load).transpose()?;
    let run = pipeline::run_periods(&args.csv, &selection, &args.periods, args.weighting, reference.as_ref())?;

    println!("{}", format_table_series(&run.series));
    println!("{}", format_period_fits(&run.fits));
    for (class, fits) in &run.class_fits {
        println!("{}", format_class_period_fits(class, fits));
    }
    if let Some(reference) = &run.reference {
        println!("{}", format_reference(reference, &run.residuals));
    }

    export_bundle(args.export_bundle.as_ref(), &run.bundle())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let config = SynthConfig {
        steps: args.steps,
        bunch_count: args.bunches,
        seed: args.seed,
        intercept: args.intercept,
        slope: args.slope,
        peak_sbil: args.peak_sbil,
        noise: args.noise,
        ..SynthConfig::default()
    };
    let fill = generate_fill(&config)?;
    write_fill_file(&args.out, &fill)?;
    log::info!("wrote {} steps to {}", fill.records.len(), args.out.display());
    Ok(())
}

/// Load the run config and pick the data directory (flag > config > env > cwd).
fn load_run(args: &RunArgs) -> Result<(RunConfig, PathBuf), AppError> {
    let config = RunConfig::load(&args.config)?;
    let data_dir = resolve_data_dir(args.data_dir.as_deref(), config.data_dir.as_deref(), data_dir_from_env());
    Ok((config, data_dir))
}

fn export_bundle(path: Option<&PathBuf>, bundle: &RenderBundle) -> Result<(), AppError> {
    if let Some(path) = path {
        write_bundle_json(path, bundle)?;
        log::info!("wrote bundle to {}", path.display());
    }
    Ok(())
}

fn check_strict(strict: bool, diagnostics: &[Diagnostic]) -> Result<(), AppError> {
    let counts = count_diagnostics(diagnostics);
    if strict && counts.errors > 0 {
        return Err(AppError::new(
            5,
            format!("{} error diagnostic(s) in strict mode.", counts.errors),
        ));
    }
    Ok(())
}
