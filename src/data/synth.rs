//! Synthetic CombinedRates fills.
//!
//! A fill starts at `peak_sbil` and decays exponentially step by step. Track
//! counts are drawn so that the accidental percentage follows
//! `intercept + slope * SBIL` plus Gaussian noise, which makes the generated
//! files a known-answer input for the derivation and fitting stages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::StepRecord;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub steps: usize,
    pub bunch_count: u64,
    pub seed: u64,
    /// Accidental percentage at zero SBIL.
    pub intercept: f64,
    /// Accidental percentage per unit of SBIL.
    pub slope: f64,
    /// SBIL of the first step.
    pub peak_sbil: f64,
    /// Steps for SBIL to fall by a factor e.
    pub lifetime_steps: f64,
    /// Tracks recorded at peak SBIL; later steps scale with SBIL.
    pub peak_tracks: u64,
    pub measurement_count: u64,
    /// Standard deviation of the accidental percentage noise.
    pub noise: f64,
    pub start_time: i64,
    pub step_seconds: i64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            steps: 40,
            bunch_count: 2000,
            seed: 42,
            intercept: 4.0,
            slope: 0.8,
            peak_sbil: 6.0,
            lifetime_steps: 30.0,
            peak_tracks: 500_000,
            measurement_count: 1200,
            noise: 0.05,
            start_time: 1_464_000_000,
            step_seconds: 300,
        }
    }
}

/// A generated fill, ready to be written in the CombinedRates grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthFill {
    pub bunch_count: u64,
    pub records: Vec<StepRecord>,
}

pub fn generate_fill(config: &SynthConfig) -> Result<SynthFill, AppError> {
    if config.steps == 0 {
        return Err(AppError::new(2, "Step count must be > 0."));
    }
    if config.bunch_count == 0 || config.measurement_count == 0 || config.peak_tracks == 0 {
        return Err(AppError::new(2, "Bunch, measurement and track counts must be > 0."));
    }
    if !(config.peak_sbil.is_finite() && config.peak_sbil > 0.0) {
        return Err(AppError::new(2, "Peak SBIL must be a positive number."));
    }
    if !(config.lifetime_steps.is_finite() && config.lifetime_steps > 0.0) {
        return Err(AppError::new(2, "Lifetime must be a positive number of steps."));
    }
    if !(config.intercept.is_finite() && config.slope.is_finite()) {
        return Err(AppError::new(2, "Intercept and slope must be finite."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, config.noise)
        .map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?;

    let lumi_units = (config.measurement_count * config.bunch_count) as f64;
    let mut records = Vec::with_capacity(config.steps);

    for i in 0..config.steps {
        let sbil = config.peak_sbil * (-(i as f64) / config.lifetime_steps).exp();

        let tracks_all = ((config.peak_tracks as f64) * sbil / config.peak_sbil).round().max(1.0) as u64;
        let percent = (config.intercept + config.slope * sbil + normal.sample(&mut rng)).clamp(0.0, 100.0);
        let accidental = ((tracks_all as f64) * percent / 100.0).round() as u64;
        let tracks_good = tracks_all - accidental.min(tracks_all);

        // Triggers exceed tracks by a few percent.
        let trigger_count = tracks_all + rng.gen_range(0..=tracks_all / 20);

        let time_begin = config.start_time + i as i64 * config.step_seconds;
        records.push(StepRecord {
            step_index: i,
            time_begin,
            time_end: time_begin + config.step_seconds,
            trigger_count,
            tracks_all,
            tracks_good,
            measurement_count: config.measurement_count,
            total_luminosity: sbil * lumi_units,
        });
    }

    log::debug!(
        "generated {} steps (seed {}, SBIL {:.3} -> {:.3})",
        records.len(),
        config.seed,
        config.peak_sbil,
        records
            .last()
            .map(|r| r.total_luminosity / lumi_units)
            .unwrap_or(config.peak_sbil)
    );

    Ok(SynthFill {
        bunch_count: config.bunch_count,
        records,
    })
}

/// Write `fill` in the CombinedRates grammar.
pub fn write_fill<W: Write>(mut w: W, fill: &SynthFill) -> std::io::Result<()> {
    writeln!(w, "{} {}", fill.records.len(), fill.bunch_count)?;
    for r in &fill.records {
        writeln!(
            w,
            "{} {} {} {} {} {} {}",
            r.time_begin,
            r.time_end,
            r.trigger_count,
            r.tracks_all,
            r.tracks_good,
            r.measurement_count,
            r.total_luminosity
        )?;
    }
    w.flush()
}

pub fn write_fill_file(path: &Path, fill: &SynthFill) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(4, format!("Failed to create '{}': {e}", path.display())))?;
    write_fill(BufWriter::new(file), fill)
        .map_err(|e| AppError::new(4, format!("Failed to write '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitWeighting, SourceSpec};
    use crate::fit::fit_all;
    use crate::io::parse_combined_rates;
    use crate::rates::derive_file;

    #[test]
    fn same_seed_same_fill() {
        let cfg = SynthConfig::default();
        assert_eq!(generate_fill(&cfg).unwrap(), generate_fill(&cfg).unwrap());

        let other = SynthConfig { seed: 7, ..cfg.clone() };
        assert_ne!(generate_fill(&cfg).unwrap(), generate_fill(&other).unwrap());
    }

    #[test]
    fn sbil_decays_and_counts_are_consistent() {
        let fill = generate_fill(&SynthConfig::default()).unwrap();
        assert_eq!(fill.records.len(), 40);
        for w in fill.records.windows(2) {
            assert!(w[1].total_luminosity < w[0].total_luminosity);
            assert_eq!(w[1].time_begin, w[0].time_end);
        }
        for r in &fill.records {
            assert!(r.tracks_good <= r.tracks_all);
            assert!(r.trigger_count >= r.tracks_all);
        }
    }

    #[test]
    fn written_fill_parses_and_recovers_the_line() {
        let cfg = SynthConfig {
            noise: 0.0,
            intercept: 3.0,
            slope: 0.5,
            ..SynthConfig::default()
        };
        let fill = generate_fill(&cfg).unwrap();

        let mut buf = Vec::new();
        write_fill(&mut buf, &fill).unwrap();
        let parsed = parse_combined_rates(buf.as_slice(), "CombinedRates_9000.txt").unwrap();
        assert!(parsed.error.is_none());
        assert_eq!(parsed.records.len(), cfg.steps);

        let spec = SourceSpec::new("CombinedRates_9000.txt", "Fill 9000", true);
        let (dataset, diags) = derive_file(&parsed, &spec);
        assert!(diags.is_empty());
        assert!((dataset.samples[0].x - cfg.peak_sbil).abs() < 1e-9);

        // Only count rounding separates the samples from the exact line.
        let fit = fit_all(&dataset.samples, FitWeighting::Uniform).unwrap();
        assert!((fit.slope - 0.5).abs() < 0.01, "slope {}", fit.slope);
        assert!((fit.intercept - 3.0).abs() < 0.05, "intercept {}", fit.intercept);
    }

    #[test]
    fn rejects_empty_fill() {
        let cfg = SynthConfig {
            steps: 0,
            ..SynthConfig::default()
        };
        assert_eq!(generate_fill(&cfg).unwrap_err().exit_code(), 2);
    }
}
