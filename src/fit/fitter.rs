//! The curve fitting capability.
//!
//! Conversion talks to fitting through [`CurveFitter`]: every cell is one
//! stateless [`FitRequest`] (formula + domain + data in, parameters out), so a
//! fitter can be shared across worker threads.
//!
//! [`LeastSquaresFitter`] is the in-process implementation:
//! - points outside the fit domain are dropped
//! - parameter-affine formulas are solved directly (SVD least squares)
//! - anything else goes through Levenberg–Marquardt

use crate::domain::{FitDomain, FitResult};
use crate::error::FitFailure;
use crate::math::{LmOptions, affine_design, levenberg_marquardt, solve_least_squares};
use crate::models::Formula;

/// One cell's fit problem.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub formula: &'a Formula,
    pub domain: FitDomain,
    pub x: &'a [f64],
    pub y: &'a [f64],
}

/// Anything that can turn a [`FitRequest`] into parameters.
///
/// Implementations must return exactly `formula.param_count()` values.
pub trait CurveFitter: Sync {
    fn fit(&self, request: &FitRequest<'_>) -> Result<FitResult, FitFailure>;
}

/// Least squares fitter used by the CLI.
#[derive(Debug, Clone, Default)]
pub struct LeastSquaresFitter {
    pub lm: LmOptions,
}

impl CurveFitter for LeastSquaresFitter {
    fn fit(&self, request: &FitRequest<'_>) -> Result<FitResult, FitFailure> {
        let FitRequest { formula, domain, x, y } = *request;
        if x.len() != y.len() {
            return Err(FitFailure::LengthMismatch { x: x.len(), y: y.len() });
        }

        let (xs, ys): (Vec<f64>, Vec<f64>) = x
            .iter()
            .zip(y)
            .filter(|&(&xi, _)| domain.contains(xi))
            .map(|(&xi, &yi)| (xi, yi))
            .unzip();

        let m = formula.param_count();
        if xs.len() < m {
            return Err(FitFailure::Underdetermined {
                points: xs.len(),
                params: m,
            });
        }

        let model = |x: f64, p: &[f64]| formula.eval(x, p);
        let params = if formula.is_linear() {
            let (design, rhs) = affine_design(model, &xs, &ys, m);
            solve_least_squares(&design, &rhs)?.iter().copied().collect()
        } else {
            levenberg_marquardt(model, &xs, &ys, vec![1.0; m], &self.lm)?
        };

        if params.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::NonFinite);
        }
        Ok(params)
    }
}

/// `y - f(x)` for each point.
pub fn residuals(formula: &Formula, params: &[f64], x: &[f64], y: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| yi - formula.eval(xi, params))
        .collect()
}
