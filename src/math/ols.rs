//! Weighted least squares solver.
//!
//! Calibration fits are small linear regression problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - We scale rows by `sqrt(w_i)` and solve an ordinary least squares problem.
//! - The solve uses SVD so tall design matrices (many more samples than
//!   parameters) are handled robustly.
//! - Parameter covariance comes from the inverse normal matrix `(XᵀWX)⁻¹`;
//!   callers decide whether to scale it by the residual variance.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted solve with the unscaled parameter covariance.
#[derive(Debug, Clone)]
pub struct WeightedSolution {
    pub beta: DVector<f64>,
    /// `(XᵀWX)⁻¹`.
    pub normal_inverse: DMatrix<f64>,
    /// `Σ w_i r_i^2`.
    pub weighted_sse: f64,
}

/// Solve `min Σ w_i (y_i - x_i^T β)^2` and return `β`, `(XᵀWX)⁻¹` and the
/// weighted SSE.
///
/// Returns `None` when the normal matrix is singular (e.g. collinear columns).
pub fn solve_weighted(x: &DMatrix<f64>, y: &DVector<f64>, w: &DVector<f64>) -> Option<WeightedSolution> {
    let (n, p) = x.shape();
    if y.len() != n || w.len() != n || n < p {
        return None;
    }

    let sqrt_w = w.map(f64::sqrt);
    let xs = DMatrix::from_fn(n, p, |i, j| x[(i, j)] * sqrt_w[i]);
    let ys = y.component_mul(&sqrt_w);

    let normal = xs.transpose() * &xs;
    let normal_inverse = normal.try_inverse()?;
    if !normal_inverse.iter().all(|v| v.is_finite()) {
        return None;
    }

    let beta = solve_least_squares(&xs, &ys)?;
    let residuals = &ys - &xs * &beta;
    let weighted_sse = residuals.norm_squared();

    Some(WeightedSolution {
        beta,
        normal_inverse,
        weighted_sse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weighted_solve_returns_normal_inverse() {
        // Two points, unit weights: XᵀX = [[2, 1], [1, 1]] -> inverse [[1, -1], [-1, 2]].
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let y = DVector::from_row_slice(&[1.0, 3.0]);
        let w = DVector::from_element(2, 1.0);

        let sol = solve_weighted(&x, &y, &w).unwrap();
        assert!((sol.beta[0] - 1.0).abs() < 1e-12);
        assert!((sol.beta[1] - 2.0).abs() < 1e-12);
        assert!((sol.normal_inverse[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((sol.normal_inverse[(0, 1)] + 1.0).abs() < 1e-12);
        assert!((sol.normal_inverse[(1, 1)] - 2.0).abs() < 1e-12);
        assert!(sol.weighted_sse.abs() < 1e-20);
    }

    #[test]
    fn weighted_solve_rejects_collinear_design() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let w = DVector::from_element(3, 1.0);
        assert!(solve_weighted(&x, &y, &w).is_none());
    }
}
