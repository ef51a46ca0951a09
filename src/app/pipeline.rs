//! Shared pipeline logic behind the subcommands.
//!
//! Each `run_*` function does the computation and returns everything the
//! front-end needs to print or export; nothing here writes to stdout.
//!
//! rates:  sources -> parse/derive (parallel) -> aggregate -> per-file/period fits
//! slopes: sources -> parse/derive -> per-file slope -> luminosity join -> trend fit
//! sides:  scan files -> per-side normalized rates
//! periods: CSV columns -> series (per class) -> period fits, reference residuals

use std::path::{Path, PathBuf};

use crate::aggregate::{Aggregation, aggregate_sources};
use crate::config::{CalibrationFile, RunConfig};
use crate::domain::{DerivedSample, FileDataset, FitModel, FitWeighting, Period};
use crate::error::{AppError, Diagnostic};
use crate::fit::{PeriodFits, PiecewiseCalibration, SlopeSummary, fit_all, fit_period, fit_periods, summarize_slopes};
use crate::io::{ColumnSelection, LabeledFit, RenderBundle, TableSeries, read_scan_rates, read_table_series};
use crate::lookup::FillLuminosityTable;
use crate::rates::{SideRates, default_groups, derive_side_rates};

/// All computed outputs of a `pltacc rates` run.
#[derive(Debug, Clone)]
pub struct RatesRun {
    pub aggregation: Aggregation,
    /// Fits of the fit-enabled files over the configured range.
    pub file_fits: Vec<LabeledFit>,
    pub all_fit: Option<FitModel>,
    pub period_fits: PeriodFits,
    /// Aggregation diagnostics followed by fit diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl RatesRun {
    pub fn bundle(&self) -> RenderBundle {
        let mut bundle = RenderBundle::new(self.aggregation.files.clone()).with_diagnostics(&self.diagnostics);
        bundle.combined = Some(self.aggregation.combined.clone());
        bundle.fits = self.file_fits.clone();
        if let Some(fit) = &self.all_fit {
            bundle.fits.push(LabeledFit {
                label: "all fills".to_string(),
                fit: fit.clone(),
            });
        }
        bundle.fits.extend(self.period_fits.fits.iter().map(|f| LabeledFit {
            label: format!("period {}", f.period()),
            fit: f.clone(),
        }));
        bundle
    }
}

/// Aggregate every configured source and run the configured fits.
pub fn run_rates(config: &RunConfig, data_dir: &Path) -> Result<RatesRun, AppError> {
    let aggregation = aggregate_checked(config, data_dir)?;
    let mut diagnostics = aggregation.diagnostics.clone();

    let file_fits = fit_files(&aggregation.files, config.fit_range, config.weighting, &mut diagnostics);

    let all_fit = if config.fit_all {
        match fit_all(&aggregation.combined.samples, config.weighting) {
            Ok(fit) => Some(fit),
            Err(e) => {
                log::warn!("fit to all fills failed: {e}");
                diagnostics.push(Diagnostic::new("all fills", e));
                None
            }
        }
    } else {
        None
    };

    let period_fits = fit_periods(&aggregation.combined.samples, &config.periods, config.weighting);
    for (period, e) in &period_fits.skipped {
        diagnostics.push(Diagnostic::new(format!("period {period}"), e.clone()));
    }

    Ok(RatesRun {
        aggregation,
        file_fits,
        all_fit,
        period_fits,
        diagnostics,
    })
}

/// All computed outputs of a `pltacc slopes` run.
#[derive(Debug, Clone)]
pub struct SlopesRun {
    pub aggregation: Aggregation,
    pub summary: SlopeSummary,
    pub diagnostics: Vec<Diagnostic>,
}

impl SlopesRun {
    pub fn bundle(&self) -> RenderBundle {
        let mut bundle = RenderBundle::new(self.aggregation.files.clone()).with_diagnostics(&self.diagnostics);
        bundle.slope_points = self.summary.points.clone();
        bundle.slope_fit = self.summary.fit.clone();
        bundle
    }
}

/// Per-file slopes vs. integrated luminosity.
///
/// `lumi_table` overrides the table named in the config.
pub fn run_slopes(config: &RunConfig, data_dir: &Path, lumi_table: Option<&Path>) -> Result<SlopesRun, AppError> {
    let table_path = lumi_table
        .map(Path::to_path_buf)
        .or_else(|| config.luminosity_table_path(data_dir))
        .ok_or_else(|| AppError::new(2, "No luminosity table: set `luminosity_table` or pass --lumi-table."))?;
    let table = FillLuminosityTable::load(&table_path)?;

    let aggregation = aggregate_checked(config, data_dir)?;
    let summary = summarize_slopes(&aggregation.files, config.slope_range(), config.weighting, &table);

    let mut diagnostics = aggregation.diagnostics.clone();
    diagnostics.extend(summary.diagnostics.iter().cloned());

    Ok(SlopesRun {
        aggregation,
        summary,
        diagnostics,
    })
}

/// All computed outputs of a `pltacc sides` run.
#[derive(Debug, Clone)]
pub struct SidesRun {
    /// `(source, rates)` of every scan that could be normalized, in input order.
    pub scans: Vec<(String, SideRates)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SidesRun {
    pub fn bundle(&self) -> RenderBundle {
        let datasets = self
            .scans
            .iter()
            .flat_map(|(_, rates)| rates.groups.iter().cloned())
            .collect();
        RenderBundle::new(datasets).with_diagnostics(&self.diagnostics)
    }
}

/// Normalized per-side rates of each scan file.
pub fn run_sides(files: &[PathBuf]) -> Result<SidesRun, AppError> {
    let groups = default_groups();
    let mut scans = Vec::new();
    let mut diagnostics = Vec::new();

    for path in files {
        let scan = match read_scan_rates(path) {
            Ok(scan) => scan,
            Err(e) => {
                log::warn!("skipping {}: {e}", path.display());
                diagnostics.push(Diagnostic::new(path.display().to_string(), e));
                continue;
            }
        };
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| scan.source.clone());

        match derive_side_rates(&scan, &label, &groups) {
            Ok(rates) => {
                diagnostics.extend(rates.diagnostics.iter().cloned());
                scans.push((scan.source.clone(), rates));
            }
            Err(e) => {
                log::warn!("{}: {e}", scan.source);
                if let Some(parse_err) = &scan.error {
                    diagnostics.push(Diagnostic::new(scan.source.clone(), parse_err.clone()));
                }
                diagnostics.push(Diagnostic::new(scan.source.clone(), e));
            }
        }
    }

    if scans.is_empty() {
        return Err(AppError::new(3, "No scan file produced side rates."));
    }
    Ok(SidesRun { scans, diagnostics })
}

/// All computed outputs of a `pltacc periods` run.
#[derive(Debug, Clone)]
pub struct PeriodsRun {
    pub series: TableSeries,
    pub fits: PeriodFits,
    /// Fits of each class on its own, ordered by class; empty without a class column.
    pub class_fits: Vec<(String, PeriodFits)>,
    pub reference: Option<PiecewiseCalibration>,
    /// The series minus the reference, where a reference period covers it.
    pub residuals: Vec<DerivedSample>,
}

impl PeriodsRun {
    pub fn bundle(&self) -> RenderBundle {
        let source = &self.series.source;
        let mut datasets = vec![dataset(source, source.clone(), self.series.samples.clone(), true)];
        for class in self.series.by_class() {
            datasets.push(dataset(source, format!("class {}", class.class), class.samples, true));
        }
        if !self.residuals.is_empty() {
            datasets.push(dataset(source, "residuals vs reference".to_string(), self.residuals.clone(), false));
        }

        let mut bundle = RenderBundle::new(datasets);
        let mut diagnostics = Vec::new();
        push_period_fits(&mut bundle.fits, &mut diagnostics, "", &self.fits);
        for (class, fits) in &self.class_fits {
            push_period_fits(&mut bundle.fits, &mut diagnostics, &format!("class {class} "), fits);
        }
        if let Some(reference) = &self.reference {
            bundle.fits.extend(reference.periods().iter().map(|f| LabeledFit {
                label: format!("reference {}", f.period()),
                fit: f.clone(),
            }));
        }
        bundle.with_diagnostics(&diagnostics)
    }
}

fn dataset(source: &str, label: String, samples: Vec<DerivedSample>, fit_enabled: bool) -> FileDataset {
    let mut ds = FileDataset::empty(source, label, fit_enabled);
    ds.samples = samples;
    ds
}

fn push_period_fits(out: &mut Vec<LabeledFit>, diagnostics: &mut Vec<Diagnostic>, prefix: &str, fits: &PeriodFits) {
    out.extend(fits.fits.iter().map(|f| LabeledFit {
        label: format!("{prefix}period {}", f.period()),
        fit: f.clone(),
    }));
    diagnostics.extend(
        fits.skipped
            .iter()
            .map(|(p, e)| Diagnostic::new(format!("{prefix}period {p}"), e.clone())),
    );
}

/// Period fits on a column-selected CSV series.
///
/// With a class column each class is also fit on its own; with a reference
/// calibration the series is compared against it.
pub fn run_periods(
    path: &Path,
    selection: &ColumnSelection,
    periods: &[Period],
    weighting: FitWeighting,
    reference: Option<&CalibrationFile>,
) -> Result<PeriodsRun, AppError> {
    let series = read_table_series(path, selection).map_err(|e| AppError::new(2, e.to_string()))?;
    if series.samples.is_empty() {
        return Err(AppError::new(
            3,
            format!("No usable rows in '{}' ({} read).", path.display(), series.rows_read),
        ));
    }
    let fits = fit_periods(&series.samples, periods, weighting);

    let class_fits: Vec<(String, PeriodFits)> = series
        .by_class()
        .into_iter()
        .map(|c| {
            log::info!("class {}: {} sample(s)", c.class, c.samples.len());
            (c.class, fit_periods(&c.samples, periods, weighting))
        })
        .collect();

    let reference = reference.map(CalibrationFile::calibration);
    let residuals = reference
        .as_ref()
        .map(|cal| cal.residuals(&series.samples))
        .unwrap_or_default();

    Ok(PeriodsRun {
        series,
        fits,
        class_fits,
        reference,
        residuals,
    })
}

fn aggregate_checked(config: &RunConfig, data_dir: &Path) -> Result<Aggregation, AppError> {
    let sources = config.source_specs(data_dir);
    log::info!("aggregating {} source(s) from {}", sources.len(), data_dir.display());

    let aggregation = aggregate_sources(&sources);
    if aggregation.usable_files() == 0 {
        return Err(AppError::new(
            3,
            format!("No usable data: none of {} source(s) produced samples.", sources.len()),
        ));
    }
    Ok(aggregation)
}

fn fit_files(
    files: &[FileDataset],
    range: Period,
    weighting: FitWeighting,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<LabeledFit> {
    let mut out = Vec::new();
    for file in files.iter().filter(|f| f.fit_enabled && !f.is_empty()) {
        match fit_period(&file.samples, range, weighting) {
            Ok(fit) => out.push(LabeledFit {
                label: file.label.clone(),
                fit,
            }),
            Err(e) => {
                log::warn!("{}: no fit over {range}: {e}", file.source);
                diagnostics.push(Diagnostic::new(file.source.clone(), e));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::config::SourceEntry;
    use crate::data::{SynthConfig, generate_fill, write_fill_file};
    use crate::fit::PeriodLine;

    fn write_synth(dir: &Path, name: &str, seed: u64, slope: f64) {
        let cfg = SynthConfig {
            seed,
            slope,
            noise: 0.0,
            ..SynthConfig::default()
        };
        let fill = generate_fill(&cfg).unwrap();
        write_fill_file(&dir.join(name), &fill).unwrap();
    }

    fn config(files: &[&str]) -> RunConfig {
        RunConfig {
            data_dir: None,
            sources: files
                .iter()
                .map(|f| SourceEntry {
                    file: PathBuf::from(f),
                    label: None,
                    fit: true,
                })
                .collect(),
            fit_range: Period::new(0.0, 9.0),
            fit_all: true,
            periods: vec![Period::new(0.0, 3.0), Period::new(3.0, 9.0), Period::new(20.0, 30.0)],
            weighting: FitWeighting::Uniform,
            luminosity_table: None,
            slope_range: None,
        }
    }

    #[test]
    fn rates_run_fits_files_and_periods() {
        let dir = tempfile::tempdir().unwrap();
        write_synth(dir.path(), "CombinedRates_5154.txt", 1, 0.5);
        write_synth(dir.path(), "CombinedRates_5162.txt", 2, 0.5);

        let cfg = config(&["CombinedRates_5154.txt", "missing_5170.txt", "CombinedRates_5162.txt"]);
        let run = run_rates(&cfg, dir.path()).unwrap();

        assert_eq!(run.aggregation.files.len(), 3);
        assert_eq!(run.aggregation.usable_files(), 2);
        assert_eq!(run.aggregation.combined.len(), 80);
        assert_eq!(run.file_fits.len(), 2);
        assert!((run.all_fit.as_ref().unwrap().slope - 0.5).abs() < 0.01);
        assert_eq!(run.period_fits.fits.len(), 2);
        assert_eq!(run.period_fits.skipped.len(), 1);

        // Missing source, then the empty period.
        assert_eq!(run.diagnostics.len(), 2);
        assert_eq!(run.diagnostics[0].error.kind(), "source-unavailable");
        assert_eq!(run.diagnostics[1].error.kind(), "insufficient-data");

        let bundle = run.bundle();
        assert_eq!(bundle.fits.len(), 5);
        assert_eq!(bundle.fits[2].label, "all fills");
    }

    #[test]
    fn rates_run_without_usable_data_fails_with_exit_3() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_rates(&config(&["nope.txt"]), dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn slopes_run_joins_luminosity() {
        let dir = tempfile::tempdir().unwrap();
        write_synth(dir.path(), "CombinedRates_5154.txt", 1, 0.5);
        write_synth(dir.path(), "CombinedRates_5162.txt", 2, 0.7);
        write_synth(dir.path(), "CombinedRates_5173.txt", 3, 0.9);
        fs::write(dir.path().join("lumi.csv"), "fill,int_lumi\n5154,10.0\n5162,20.0\n5173,30.0\n").unwrap();

        let mut cfg = config(&["CombinedRates_5154.txt", "CombinedRates_5162.txt", "CombinedRates_5173.txt"]);
        cfg.luminosity_table = Some(PathBuf::from("lumi.csv"));

        let run = run_slopes(&cfg, dir.path(), None).unwrap();
        assert_eq!(run.summary.points.len(), 3);
        assert!(run.summary.points.iter().all(|p| p.resolved));
        let fit = run.summary.fit.as_ref().unwrap();
        assert!((fit.slope - 0.02).abs() < 0.001, "trend slope {}", fit.slope);
        assert_eq!(run.bundle().slope_points.len(), 3);
    }

    #[test]
    fn slopes_run_requires_a_table() {
        let dir = tempfile::tempdir().unwrap();
        write_synth(dir.path(), "CombinedRates_5154.txt", 1, 0.5);
        let err = run_slopes(&config(&["CombinedRates_5154.txt"]), dir.path(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn sides_run_normalizes_and_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("Fill4266_scanX.txt");
        let line = |step: i64, sep: f64, hits: u64| {
            let channels: Vec<String> = (0..16).map(|c| (hits + c).to_string()).collect();
            format!("{step} 100 200 {sep} 4.0 {}\n", channels.join(" "))
        };
        let text = [
            "# scan X\n".to_string(),
            line(0, 0.0, 1000),
            line(1, -0.3, 200),
            line(2, 0.0, 400),
            line(20, 0.0, 1000),
        ]
        .concat();
        fs::write(&scan, text).unwrap();

        let run = run_sides(&[scan, dir.path().join("missing.txt")]).unwrap();
        assert_eq!(run.scans.len(), 1);
        let rates = &run.scans[0].1;
        assert_eq!(rates.groups.len(), 2);
        assert_eq!(rates.groups[0].samples.len(), 2);
        assert_eq!(rates.groups[0].samples[1].y, 1.0);
        assert_eq!(run.diagnostics.len(), 1);
        assert_eq!(run.bundle().datasets.len(), 2);
    }

    #[test]
    fn periods_run_on_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramses.csv");
        fs::write(&path, "x,y\n1,5\n2,7\n3,9\n4,11\n5,bad\n").unwrap();

        let run = run_periods(
            &path,
            &ColumnSelection::new(0, 1),
            &[Period::new(0.0, 4.0)],
            FitWeighting::Uniform,
            None,
        )
        .unwrap();
        assert_eq!(run.series.row_errors.len(), 1);
        assert!((run.fits.fits[0].slope - 2.0).abs() < 1e-9);
        assert!((run.fits.fits[0].intercept - 3.0).abs() < 1e-9);

        let missing = run_periods(
            &dir.path().join("nope.csv"),
            &ColumnSelection::new(0, 1),
            &[Period::new(0.0, 4.0)],
            FitWeighting::Uniform,
            None,
        );
        assert_eq!(missing.unwrap_err().exit_code(), 2);
    }

    #[test]
    fn periods_run_fits_each_class_and_compares_to_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emittance.csv");
        // Leading bunches follow y = 1 + x, train bunches y = 2x.
        fs::write(
            &path,
            "sbil,xsec,leading\n1,2,1\n2,3,1\n3,4,1\n1,2,0\n2,4,0\n3,6,0\n",
        )
        .unwrap();
        let selection = ColumnSelection {
            class_col: Some(2),
            ..ColumnSelection::new(0, 1)
        };
        let reference = CalibrationFile {
            scale: 2.0,
            periods: vec![PeriodLine {
                start: 0.0,
                end: 2.5,
                intercept: 0.5,
                slope: 0.5,
            }],
        };

        let run = run_periods(
            &path,
            &selection,
            &[Period::new(0.0, 4.0)],
            FitWeighting::Uniform,
            Some(&reference),
        )
        .unwrap();

        assert_eq!(run.fits.fits[0].n_points, 6);
        assert_eq!(run.class_fits.len(), 2);
        let (train, train_fits) = &run.class_fits[0];
        let (leading, leading_fits) = &run.class_fits[1];
        assert_eq!((train.as_str(), leading.as_str()), ("0", "1"));
        assert!((train_fits.fits[0].slope - 2.0).abs() < 1e-9);
        assert!(train_fits.fits[0].intercept.abs() < 1e-9);
        assert!((leading_fits.fits[0].slope - 1.0).abs() < 1e-9);
        assert!((leading_fits.fits[0].intercept - 1.0).abs() < 1e-9);

        // Reference is y = 1 + x on [0, 2.5]: leading rows sit on it.
        assert_eq!(run.residuals.len(), 4);
        assert!(run.residuals[0].y.abs() < 1e-12);
        assert!((run.residuals[3].y - 1.0).abs() < 1e-12);

        let bundle = run.bundle();
        let labels: Vec<&str> = bundle.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, ["emittance.csv", "class 0", "class 1", "residuals vs reference"]);
        assert_eq!(bundle.fits.len(), 4);
        assert_eq!(bundle.fits[1].label, "class 0 period [0, 4]");
        assert_eq!(bundle.fits[3].label, "reference [0, 2.5]");
    }
}
