//! Fit domain resolution.
//!
//! A batch shares one fit domain. When the upper bound is not given it is the
//! smallest of the per-run ladder maxima, so no run is ever fitted beyond the
//! voltages it was actually calibrated with.

use tracing::debug;

use crate::domain::{BoundPolicy, CalibrationRun, FitDomain};
use crate::error::BoundError;

/// Resolve `[from, to]` for a batch of runs.
pub fn resolve_bounds(
    runs: &[CalibrationRun],
    fit_from: Option<f64>,
    fit_to: Option<f64>,
    policy: BoundPolicy,
) -> Result<FitDomain, BoundError> {
    let ceiling = runs.iter().filter_map(|r| r.voltage.max()).reduce(f64::min);

    let (from, to) = match policy {
        BoundPolicy::Batch => {
            let from = fit_from.unwrap_or(0.0);
            let to = match fit_to {
                Some(to) => to,
                None => ceiling.ok_or(BoundError::NoRuns)?,
            };
            (from, to)
        }
        BoundPolicy::Legacy => {
            let from = match fit_from {
                Some(f) if f >= 0.0 => f,
                _ => 0.0,
            };
            let to = match (fit_to, ceiling) {
                (Some(to), Some(max)) => to.min(max),
                (Some(to), None) => to,
                (None, Some(max)) => max,
                (None, None) => return Err(BoundError::NoRuns),
            };
            (from, to)
        }
    };

    if !(from.is_finite() && to.is_finite()) || from > to {
        return Err(BoundError::InvalidDomain { from, to });
    }

    debug!(from, to, ?policy, runs = runs.len(), "resolved fit domain");
    Ok(FitDomain { from, to })
}
