//! Straight-line calibration fits over x-ranges ("periods").
//!
//! Each period is fit independently with `y = intercept + slope * x`; nothing
//! ties neighbouring periods together, so a piecewise calibration may jump at
//! period boundaries.
//!
//! Error estimates depend on the weighting:
//! - `Uniform`: `cov = s² (XᵀX)⁻¹` with `s² = SSE / (n - 2)` (zero when n = 2)
//! - `InverseVariance`: `cov = (XᵀWX)⁻¹` with `w_i = 1 / σ_i²`

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::{DerivedSample, FitModel, FitWeighting, Period};
use crate::error::PipelineError;
use crate::math::solve_weighted;

/// Relative x spread below which a period is treated as a single x value.
const X_SPREAD_EPS: f64 = 1e-12;

/// Fit one period of `samples`.
pub fn fit_period(samples: &[DerivedSample], period: Period, weighting: FitWeighting) -> Result<FitModel, PipelineError> {
    let selected: Vec<&DerivedSample> = samples.iter().filter(|s| period.contains(s.x)).collect();
    let n = selected.len();
    if n < 2 {
        return Err(PipelineError::InsufficientData {
            start: period.start,
            end: period.end,
            found: n,
        });
    }

    let (x_min, x_max) = selected
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s.x), hi.max(s.x)));
    let scale = x_min.abs().max(x_max.abs()).max(1.0);
    if (x_max - x_min) <= X_SPREAD_EPS * scale {
        return Err(PipelineError::DegenerateFit {
            start: period.start,
            end: period.end,
        });
    }

    let weighting = resolve_weighting(&selected, weighting);
    let weights: DVector<f64> = match weighting {
        FitWeighting::Uniform => DVector::from_element(n, 1.0),
        FitWeighting::InverseVariance => {
            DVector::from_iterator(n, selected.iter().map(|s| 1.0 / (s.y_error * s.y_error)))
        }
    };

    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { selected[i].x });
    let y = DVector::from_iterator(n, selected.iter().map(|s| s.y));

    let solution = solve_weighted(&design, &y, &weights).ok_or(PipelineError::DegenerateFit {
        start: period.start,
        end: period.end,
    })?;

    let ndf = n - 2;
    let cov_scale = match weighting {
        FitWeighting::Uniform if ndf > 0 => solution.weighted_sse / ndf as f64,
        FitWeighting::Uniform => 0.0,
        FitWeighting::InverseVariance => 1.0,
    };
    let cov = &solution.normal_inverse * cov_scale;

    Ok(FitModel {
        range_start: period.start,
        range_end: period.end,
        intercept: solution.beta[0],
        slope: solution.beta[1],
        intercept_error: cov[(0, 0)].max(0.0).sqrt(),
        slope_error: cov[(1, 1)].max(0.0).sqrt(),
        n_points: n,
        chi2: solution.weighted_sse,
        ndf,
        weighting,
    })
}

fn resolve_weighting(selected: &[&DerivedSample], requested: FitWeighting) -> FitWeighting {
    match requested {
        FitWeighting::InverseVariance
            if !selected.iter().all(|s| s.y_error.is_finite() && s.y_error > 0.0) =>
        {
            log::debug!("samples without a positive y error in period; using uniform weights");
            FitWeighting::Uniform
        }
        other => other,
    }
}

/// Fit a whole dataset: the period spans its full x-range.
pub fn fit_all(samples: &[DerivedSample], weighting: FitWeighting) -> Result<FitModel, PipelineError> {
    let (lo, hi) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s.x), hi.max(s.x)));
    if !(lo.is_finite() && hi.is_finite()) {
        return Err(PipelineError::InsufficientData {
            start: 0.0,
            end: 0.0,
            found: 0,
        });
    }
    fit_period(samples, Period::new(lo, hi), weighting)
}

/// Independent fits for several periods of one dataset.
#[derive(Debug, Clone, Default)]
pub struct PeriodFits {
    pub fits: Vec<FitModel>,
    /// Periods that could not be fit, with the reason.
    pub skipped: Vec<(Period, PipelineError)>,
}

impl PeriodFits {
    pub fn calibration(&self) -> PiecewiseCalibration {
        PiecewiseCalibration::new(self.fits.clone())
    }
}

/// Fit each period; underdetermined periods are skipped, logged and reported.
pub fn fit_periods(samples: &[DerivedSample], periods: &[Period], weighting: FitWeighting) -> PeriodFits {
    let mut out = PeriodFits::default();
    for &period in periods {
        match fit_period(samples, period, weighting) {
            Ok(fit) => out.fits.push(fit),
            Err(e) => {
                log::warn!("skipping period {period}: {e}");
                out.skipped.push((period, e));
            }
        }
    }
    out
}

/// A fixed line `intercept + slope * x` over `[start, end]`.
///
/// Deserializes from either an object or a `[start, end, intercept, slope]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodLine {
    pub start: f64,
    pub end: f64,
    pub intercept: f64,
    pub slope: f64,
}

impl PeriodLine {
    pub fn period(&self) -> Period {
        Period::new(self.start, self.end)
    }
}

/// Piecewise-linear calibration assembled from independent period fits.
#[derive(Debug, Clone, Default)]
pub struct PiecewiseCalibration {
    periods: Vec<FitModel>,
}

impl PiecewiseCalibration {
    pub fn new(periods: Vec<FitModel>) -> Self {
        Self { periods }
    }

    pub fn periods(&self) -> &[FitModel] {
        &self.periods
    }

    /// Calibration from fixed period lines, with intercept and slope
    /// multiplied by `scale`.
    ///
    /// The periods carry no fit statistics: errors, `n_points`, `chi2` and
    /// `ndf` are zero.
    pub fn from_parameters(params: &[PeriodLine], scale: f64) -> Self {
        let periods = params
            .iter()
            .map(|p| FitModel {
                range_start: p.start,
                range_end: p.end,
                intercept: p.intercept * scale,
                slope: p.slope * scale,
                intercept_error: 0.0,
                slope_error: 0.0,
                n_points: 0,
                chi2: 0.0,
                ndf: 0,
                weighting: FitWeighting::Uniform,
            })
            .collect();
        Self { periods }
    }

    /// Evaluate the first period whose range contains `x`.
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        self.periods
            .iter()
            .find(|p| p.period().contains(x))
            .map(|p| p.predict(x))
    }

    /// `y - evaluate(x)` for each sample a period covers; the error is kept.
    pub fn residuals(&self, samples: &[DerivedSample]) -> Vec<DerivedSample> {
        samples
            .iter()
            .filter_map(|s| self.evaluate(s.x).map(|c| DerivedSample::new(s.x, s.y - c, s.y_error)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(xs: &[f64], a: f64, b: f64) -> Vec<DerivedSample> {
        xs.iter().map(|&x| DerivedSample::new(x, a + b * x, 0.5)).collect()
    }

    #[test]
    fn noiseless_line_is_recovered_exactly() {
        let samples = line(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3.0, 2.0);
        for period in [Period::new(0.0, 6.0), Period::new(2.0, 3.0), Period::new(4.5, 6.0)] {
            for weighting in [FitWeighting::Uniform, FitWeighting::InverseVariance] {
                let fit = fit_period(&samples, period, weighting).unwrap();
                assert!((fit.intercept - 3.0).abs() < 1e-9, "{period}: a={}", fit.intercept);
                assert!((fit.slope - 2.0).abs() < 1e-9, "{period}: b={}", fit.slope);
                if weighting == FitWeighting::Uniform {
                    assert!(fit.intercept_error.abs() < 1e-6);
                    assert!(fit.slope_error.abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn single_point_period_is_insufficient() {
        let samples = line(&[0.0, 1.0, 2.0], 3.0, 2.0);
        let err = fit_period(&samples, Period::new(0.5, 1.5), FitWeighting::Uniform).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InsufficientData {
                start: 0.5,
                end: 1.5,
                found: 1
            }
        );
    }

    #[test]
    fn uniform_errors_match_textbook_formula() {
        let samples = vec![
            DerivedSample::new(1.0, 1.0, 0.0),
            DerivedSample::new(2.0, 3.0, 0.0),
            DerivedSample::new(3.0, 2.0, 0.0),
            DerivedSample::new(4.0, 5.0, 0.0),
        ];
        let fit = fit_period(&samples, Period::new(0.0, 10.0), FitWeighting::Uniform).unwrap();

        // x̄ = 2.5, ȳ = 2.75, Sxx = 5, Sxy = 5.5 -> b = 1.1, a = 0
        assert!((fit.slope - 1.1).abs() < 1e-10);
        assert!(fit.intercept.abs() < 1e-10);
        // residuals: -0.1, 0.8, -1.3, 0.6 -> SSE = 2.7, s² = 1.35
        assert!((fit.chi2 - 2.7).abs() < 1e-9);
        assert_eq!(fit.ndf, 2);
        let s2 = 1.35;
        assert!((fit.slope_error - (s2 / 5.0_f64).sqrt()).abs() < 1e-9);
        assert!((fit.intercept_error - (s2 * (0.25 + 2.5 * 2.5 / 5.0)).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn inverse_variance_falls_back_without_errors() {
        let mut samples = line(&[0.0, 1.0, 2.0], 1.0, 1.0);
        samples[1].y_error = 0.0;
        let fit = fit_period(&samples, Period::new(0.0, 2.0), FitWeighting::InverseVariance).unwrap();
        assert_eq!(fit.weighting, FitWeighting::Uniform);
    }

    #[test]
    fn inverse_variance_errors_ignore_residual_scale() {
        // Two points with sigma = 1: cov = (XᵀX)⁻¹ for x = [0, 1] -> var(b) = 2.
        let samples = vec![DerivedSample::new(0.0, 0.0, 1.0), DerivedSample::new(1.0, 1.0, 1.0)];
        let fit = fit_period(&samples, Period::new(0.0, 1.0), FitWeighting::InverseVariance).unwrap();
        assert!((fit.slope_error - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((fit.intercept_error - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identical_x_values_are_degenerate() {
        let samples = vec![DerivedSample::new(0.1, 1.0, 0.1), DerivedSample::new(0.1, 2.0, 0.1)];
        assert!(matches!(
            fit_period(&samples, Period::new(0.0, 1.0), FitWeighting::Uniform),
            Err(PipelineError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn periods_are_independent_and_bad_ones_skipped() {
        let mut samples = line(&[0.0, 1.0, 2.0], 1.0, 1.0);
        samples.extend(line(&[10.0, 11.0, 12.0], 50.0, -2.0));
        let periods = [Period::new(0.0, 2.0), Period::new(5.0, 6.0), Period::new(10.0, 12.0)];
        let fits = fit_periods(&samples, &periods, FitWeighting::Uniform);

        assert_eq!(fits.fits.len(), 2);
        assert_eq!(fits.skipped.len(), 1);
        assert_eq!(fits.skipped[0].0, Period::new(5.0, 6.0));
        assert!((fits.fits[1].slope + 2.0).abs() < 1e-9);

        let cal = fits.calibration();
        assert!((cal.evaluate(1.5).unwrap() - 2.5).abs() < 1e-9);
        assert!((cal.evaluate(11.0).unwrap() - 28.0).abs() < 1e-9);
        assert!(cal.evaluate(7.0).is_none());
    }

    #[test]
    fn fixed_parameters_are_scaled() {
        // Slope vs. fill periods, stored as fractions and plotted in percent.
        let params = [
            PeriodLine {
                start: 4.387,
                end: 23.176,
                intercept: -0.0013287,
                slope: -0.0002726,
            },
            PeriodLine {
                start: 23.176,
                end: 30.0,
                intercept: 0.002,
                slope: 0.0,
            },
        ];
        let cal = PiecewiseCalibration::from_parameters(&params, 100.0);
        assert_eq!(cal.periods().len(), 2);
        assert_eq!(cal.periods()[0].period(), params[0].period());
        assert_eq!(cal.periods()[0].n_points, 0);

        let at_10 = cal.evaluate(10.0).unwrap();
        assert!((at_10 - (-0.13287 - 0.02726 * 10.0)).abs() < 1e-9, "{at_10}");
        // The shared boundary belongs to the first period.
        let at_edge = cal.evaluate(23.176).unwrap();
        assert!((at_edge - (-0.13287 - 0.02726 * 23.176)).abs() < 1e-9);
        assert!((cal.evaluate(25.0).unwrap() - 0.2).abs() < 1e-12);
        assert!(cal.evaluate(2.0).is_none());

        let samples = [DerivedSample::new(25.0, 0.5, 0.1), DerivedSample::new(40.0, 1.0, 0.1)];
        let residuals = cal.residuals(&samples);
        assert_eq!(residuals.len(), 1);
        assert!((residuals[0].y - 0.3).abs() < 1e-12);
        assert_eq!(residuals[0].y_error, 0.1);
    }

    #[test]
    fn fit_all_spans_every_sample() {
        let samples = line(&[0.5, 1.5, 9.0], -1.0, 0.5);
        let fit = fit_all(&samples, FitWeighting::Uniform).unwrap();
        assert_eq!(fit.n_points, 3);
        assert_eq!(fit.range_start, 0.5);
        assert_eq!(fit.range_end, 9.0);
        assert!(fit_all(&[], FitWeighting::Uniform).is_err());
    }
}
