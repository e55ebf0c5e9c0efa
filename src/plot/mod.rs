//! Diagnostic plotting.
//!
//! Conversion can hand one [`DiagnosticPlot`] to a [`PlotSink`] before bulk
//! fitting. The plot is a side channel: it never changes what gets written.
//!
//! Sinks:
//! - `plot::ascii::AsciiPlotSink`: fixed-size text panels on any writer
//! - `tui::TerminalPlotSink`: interactive panes, blocks until dismissed

use crate::error::PlotError;

pub mod ascii;

pub use ascii::AsciiPlotSink;

/// Everything needed to draw the three diagnostic views of one channel block.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticPlot {
    pub title: String,
    /// Voltage ladder in file order.
    pub voltage: Vec<f64>,
    /// Raw codes of every cell of the block, each aligned with `voltage`.
    pub cells: Vec<Vec<f64>>,
    /// The (sorted) points the first cell was fitted on.
    pub fit_points: Vec<(f64, f64)>,
    /// Fitted curve sampled over the fit domain.
    pub curve: Vec<(f64, f64)>,
    /// `(voltage, data - fit)` inside the fit domain.
    pub residuals: Vec<(f64, f64)>,
    pub params: Vec<f64>,
}

impl DiagnosticPlot {
    /// Raw overlay: every `(voltage, code)` pair of every cell.
    pub fn raw_points(&self) -> Vec<(f64, f64)> {
        self.cells
            .iter()
            .flat_map(|cell| self.voltage.iter().copied().zip(cell.iter().copied()))
            .collect()
    }
}

/// A renderer for diagnostic plots.
pub trait PlotSink {
    fn show(&mut self, plot: &DiagnosticPlot) -> Result<(), PlotError>;
}

/// Min/max of finite values, `None` when empty or degenerate.
pub(crate) fn finite_range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (min.is_finite() && max.is_finite()).then_some((min, max))
}

/// Widen a range by `frac` of its span on both sides (never to zero width).
pub(crate) fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-9 * (1.0 + min.abs().max(max.abs())));
    (min - pad, max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_points_pair_every_cell_with_the_ladder() {
        let plot = DiagnosticPlot {
            title: String::new(),
            voltage: vec![0.0, 1.0],
            cells: vec![vec![10.0, 20.0], vec![11.0, 21.0]],
            fit_points: vec![],
            curve: vec![],
            residuals: vec![],
            params: vec![],
        };
        assert_eq!(
            plot.raw_points(),
            vec![(0.0, 10.0), (1.0, 20.0), (0.0, 11.0), (1.0, 21.0)]
        );
    }

    #[test]
    fn ranges() {
        assert_eq!(finite_range([3.0, f64::NAN, -1.0, 2.0]), Some((-1.0, 3.0)));
        assert_eq!(finite_range(Vec::<f64>::new()), None);
        let (lo, hi) = pad_range(5.0, 5.0, 0.05);
        assert!(lo < 5.0 && hi > 5.0);
    }
}
