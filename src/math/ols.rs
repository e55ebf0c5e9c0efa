//! Linear least squares.
//!
//! A formula that is affine in its parameters,
//!
//! ```text
//! f(x; p) = c(x) + Σ_j p_j g_j(x)
//! ```
//!
//! is fitted by solving `min ‖G p - (y - c)‖²` directly. SVD keeps this robust
//! for the tall, thin design matrices a calibration cell produces (tens of
//! probes, a handful of parameters) and for nearly collinear columns such as
//! high-order polynomials over a narrow voltage range.

use nalgebra::{DMatrix, DVector};

use crate::error::FitFailure;

/// Solve a least squares problem using SVD.
///
/// A non-finite entry in `x` or `y` is rejected up front; nalgebra's SVD
/// does not converge on NaN or infinite input.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>, FitFailure> {
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    let svd = x.clone().try_svd(true, true, f64::EPSILON, 0).ok_or(FitFailure::Singular)?;

    // Try progressively looser tolerances if the strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Ok(beta);
            }
        }
    }

    Err(FitFailure::Singular)
}

/// Build the design matrix and adjusted targets for a parameter-affine model.
///
/// `model(x, p)` is probed at `p = 0` (the offset `c(x)`) and at each unit
/// vector `e_j` (giving `c(x) + g_j(x)`).
pub fn affine_design<F>(model: F, xs: &[f64], ys: &[f64], n_params: usize) -> (DMatrix<f64>, DVector<f64>)
where
    F: Fn(f64, &[f64]) -> f64,
{
    let n = xs.len();
    let mut design = DMatrix::<f64>::zeros(n, n_params);
    let mut rhs = DVector::<f64>::zeros(n);
    let zeros = vec![0.0; n_params];
    let mut unit = vec![0.0; n_params];

    for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
        let offset = model(x, &zeros);
        for j in 0..n_params {
            unit[j] = 1.0;
            design[(i, j)] = model(x, &unit) - offset;
            unit[j] = 0.0;
        }
        rhs[i] = y - offset;
    }

    (design, rhs)
}
