//! Levenberg–Marquardt for formulas that are not linear in their parameters.
//!
//! The Jacobian is taken by central differences, so any formula the model
//! language can express is fittable without symbolic derivatives.

use nalgebra::{DMatrix, DVector};

use crate::error::FitFailure;

/// Iteration controls.
#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative tolerance on cost decrease and step size.
    pub tolerance: f64,
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

/// Damping above which no step can reduce the cost any more: we are at a minimum.
const LAMBDA_CEILING: f64 = 1e16;

/// Minimize `Σ (y_i - model(x_i, p))²` starting from `initial`.
pub fn levenberg_marquardt<F>(
    model: F,
    xs: &[f64],
    ys: &[f64],
    initial: Vec<f64>,
    opts: &LmOptions,
) -> Result<Vec<f64>, FitFailure>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let m = initial.len();
    let mut p = DVector::from_vec(initial);
    let mut r = residual_vector(&model, xs, ys, p.as_slice()).ok_or(FitFailure::NonFinite)?;
    let mut cost = r.norm_squared();
    let mut lambda = opts.initial_lambda;

    for _ in 0..opts.max_iterations {
        if cost == 0.0 {
            return Ok(p.iter().copied().collect());
        }

        let j = jacobian(&model, xs, p.as_slice()).ok_or(FitFailure::NonFinite)?;
        let jt = j.transpose();
        let a = &jt * &j;
        let g = &jt * &r;

        if g.amax() <= opts.tolerance * cost.max(f64::MIN_POSITIVE) {
            return Ok(p.iter().copied().collect());
        }

        loop {
            let mut damped = a.clone();
            for k in 0..m {
                damped[(k, k)] += lambda * a[(k, k)].max(1e-12);
            }

            let Some(step) = damped.cholesky().map(|c| c.solve(&g)) else {
                lambda *= 10.0;
                if lambda > LAMBDA_CEILING {
                    return Err(FitFailure::Singular);
                }
                continue;
            };

            let candidate = &p + &step;
            let trial = residual_vector(&model, xs, ys, candidate.as_slice());
            let trial_cost = trial.as_ref().map(|t| t.norm_squared());

            match (trial, trial_cost) {
                (Some(trial), Some(trial_cost)) if trial_cost < cost => {
                    let decrease = cost - trial_cost;
                    let step_norm = step.norm();
                    let p_norm = p.norm();

                    p = candidate;
                    r = trial;
                    cost = trial_cost;
                    lambda = (lambda / 10.0).max(1e-12);

                    if decrease <= opts.tolerance * cost
                        || step_norm <= opts.tolerance * (p_norm + opts.tolerance)
                    {
                        return Ok(p.iter().copied().collect());
                    }
                    break;
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > LAMBDA_CEILING {
                        return Ok(p.iter().copied().collect());
                    }
                }
            }
        }
    }

    Err(FitFailure::NoConvergence {
        iterations: opts.max_iterations,
    })
}

fn residual_vector<F>(model: &F, xs: &[f64], ys: &[f64], p: &[f64]) -> Option<DVector<f64>>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let r = DVector::from_iterator(xs.len(), xs.iter().zip(ys).map(|(&x, &y)| y - model(x, p)));
    r.iter().all(|v| v.is_finite()).then_some(r)
}

fn jacobian<F>(model: &F, xs: &[f64], p: &[f64]) -> Option<DMatrix<f64>>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let mut j = DMatrix::<f64>::zeros(xs.len(), p.len());
    let mut probe = p.to_vec();

    for k in 0..p.len() {
        let h = 1e-6 * p[k].abs().max(1.0);
        for (i, &x) in xs.iter().enumerate() {
            probe[k] = p[k] + h;
            let up = model(x, &probe);
            probe[k] = p[k] - h;
            let down = model(x, &probe);
            j[(i, k)] = (up - down) / (2.0 * h);
        }
        probe[k] = p[k];
    }

    j.iter().all(|v| v.is_finite()).then_some(j)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exponential_parameters() {
        let model = |x: f64, p: &[f64]| p[0] * (p[1] * x).exp();
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| model(x, &[2.5, 0.7])).collect();

        let p = levenberg_marquardt(model, &xs, &ys, vec![1.0, 1.0], &LmOptions::default()).unwrap();
        assert!((p[0] - 2.5).abs() < 1e-6, "p0 = {}", p[0]);
        assert!((p[1] - 0.7).abs() < 1e-6, "p1 = {}", p[1]);
    }

    #[test]
    fn linear_model_converges_quickly() {
        let model = |x: f64, p: &[f64]| p[0] + p[1] * x;
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.1, 4.9, 7.0];
        let opts = LmOptions {
            max_iterations: 20,
            ..LmOptions::default()
        };

        let p = levenberg_marquardt(model, &xs, &ys, vec![1.0, 1.0], &opts).unwrap();
        assert!((p[0] - 1.03).abs() < 1e-6, "p0 = {}", p[0]);
        assert!((p[1] - 1.98).abs() < 1e-6, "p1 = {}", p[1]);
    }

    #[test]
    fn non_finite_start_is_reported() {
        let model = |x: f64, p: &[f64]| (p[0] * x).ln();
        let err = levenberg_marquardt(model, &[-1.0, -2.0], &[0.0, 0.0], vec![1.0], &LmOptions::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::NonFinite);
    }
}
