//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks over SSH or in CI logs
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - data points: `o`
//! - fitted curve / zero line: `-`

use std::io::Write;

use crate::error::PlotError;
use crate::plot::{DiagnosticPlot, PlotSink, finite_range, pad_range};

/// Writes the three diagnostic panels as text.
pub struct AsciiPlotSink<W: Write> {
    out: W,
    width: usize,
    height: usize,
}

impl<W: Write> AsciiPlotSink<W> {
    pub fn new(out: W, width: usize, height: usize) -> Self {
        Self { out, width, height }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PlotSink for AsciiPlotSink<W> {
    fn show(&mut self, plot: &DiagnosticPlot) -> Result<(), PlotError> {
        let text = render_diagnostic(plot, self.width, self.height);
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Render all three views of a diagnostic plot.
pub fn render_diagnostic(plot: &DiagnosticPlot, width: usize, height: usize) -> String {
    let mut out = format!("=== {} ===\n", plot.title);
    out.push_str(&format!("parameters: {}\n\n", format_params(&plot.params)));

    out.push_str(&format!("[raw] {} cells\n", plot.cells.len()));
    out.push_str(&render_panel(&plot.raw_points(), None, width, height));

    out.push_str("\n[fit] first cell\n");
    out.push_str(&render_panel(&plot.fit_points, Some(plot.curve.as_slice()), width, height));

    out.push_str("\n[residuals]\n");
    let zero_line = finite_range(plot.residuals.iter().map(|&(x, _)| x))
        .map(|(lo, hi)| vec![(lo, 0.0), (hi, 0.0)])
        .unwrap_or_default();
    out.push_str(&render_panel(&plot.residuals, Some(zero_line.as_slice()), width, height));

    out
}

fn format_params(params: &[f64]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{i}]={p:.6e}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_panel(points: &[(f64, f64)], curve: Option<&[(f64, f64)]>, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let all = || points.iter().chain(curve.unwrap_or_default().iter());
    let (x_min, x_max) = finite_range(all().map(|&(x, _)| x)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = finite_range(all().map(|&(_, y)| y)).unwrap_or((0.0, 1.0));
    let (x_min, x_max) = if x_max > x_min { (x_min, x_max) } else { pad_range(x_min, x_max, 0.05) };
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Draw curve first (so points can overlay).
    if let Some(curve) = curve {
        draw_curve(&mut grid, curve, x_min, x_max, y_min, y_max);
    }

    for &(x, y) in points {
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        grid[row][col] = 'o';
    }

    let mut out = format!("x=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.3}, {y_max:.3}]\n");
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve {
        if !(x.is_finite() && y.is_finite()) {
            prev = None;
            continue;
        }
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        if let Some((c0, r0)) = prev {
            draw_line(grid, c0, r0, col, row, '-');
        } else {
            grid[row][col] = '-';
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
