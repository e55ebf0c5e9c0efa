//! Plotters-powered chart widget for Ratatui.
//!
//! Plotters output is rendered into the Ratatui buffer using
//! `plotters-ratatui-backend`.

use plotters::prelude::*;
use plotters_ratatui_backend::widget_fn;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::Widget,
};

/// A render-only chart: every series and bound is computed before `render()`.
pub struct CalibrationChart<'a> {
    /// Scatter series, drawn as pixels.
    pub points: &'a [(f64, f64)],
    /// Optional line series drawn under the points (fitted curve, zero line).
    pub line: Option<&'a [(f64, f64)]>,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub x_label: &'a str,
    pub y_label: &'a str,
}

impl<'a> CalibrationChart<'a> {
    /// Build a chart with bounds derived from its own data.
    pub fn fitted(
        points: &'a [(f64, f64)],
        line: Option<&'a [(f64, f64)]>,
        x_label: &'a str,
        y_label: &'a str,
    ) -> Self {
        let all = || points.iter().chain(line.unwrap_or_default().iter());
        let x_bounds = bounds(all().map(|&(x, _)| x));
        let y_bounds = bounds(all().map(|&(_, y)| y));
        Self {
            points,
            line,
            x_bounds,
            y_bounds,
            x_label,
            y_label,
        }
    }
}

/// Padded axis bounds; falls back to `[0, 1]` for empty or flat data.
fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    match crate::plot::finite_range(values) {
        Some((lo, hi)) => {
            let (lo, hi) = crate::plot::pad_range(lo, hi, 0.05);
            [lo, hi]
        }
        None => [0.0, 1.0],
    }
}

impl<'a> Widget for CalibrationChart<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Plotters may fail to build a chart in a tiny area.
        if area.width < 20 || area.height < 8 {
            buf.set_string(
                area.x,
                area.y,
                "Chart area too small (resize terminal).",
                Style::default().fg(Color::Yellow),
            );
            return;
        }

        let [x0, x1] = self.x_bounds;
        let [y0, y1] = self.y_bounds;
        if !(x0.is_finite() && x1.is_finite() && y0.is_finite() && y1.is_finite()) || x1 <= x0 || y1 <= y0 {
            return;
        }

        let widget = widget_fn(move |root| {
            let mut chart = ChartBuilder::on(&root)
                .margin(1)
                .set_label_area_size(LabelAreaPosition::Left, 8)
                .set_label_area_size(LabelAreaPosition::Bottom, 3)
                .build_cartesian_2d(x0..x1, y0..y1)?;

            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_y_mesh()
                .x_desc(self.x_label)
                .y_desc(self.y_label)
                .x_labels(5)
                .y_labels(5)
                .x_label_formatter(&|v| format!("{v:.2}"))
                .y_label_formatter(&|v| format!("{v:.1}"))
                .label_style(("sans-serif", 10).into_font().color(&WHITE))
                .axis_style(&WHITE)
                .bold_line_style(&WHITE)
                .draw()?;

            let line_color = RGBColor(0, 255, 255); // cyan

            if let Some(line) = self.line {
                chart.draw_series(LineSeries::new(line.iter().copied(), &line_color))?;
            }

            // `Circle` radii are mis-scaled by the ratatui backend; pixels render cleanly.
            chart.draw_series(self.points.iter().map(|&(x, y)| Pixel::new((x, y), WHITE)))?;

            Ok(())
        });

        widget.render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_points_and_line() {
        let points = [(0.0, 1.0), (2.0, 3.0)];
        let line = [(-1.0, 0.0), (4.0, 5.0)];
        let chart = CalibrationChart::fitted(&points, Some(&line[..]), "x", "y");
        assert!(chart.x_bounds[0] < -1.0 && chart.x_bounds[1] > 4.0);
        assert!(chart.y_bounds[0] < 0.0 && chart.y_bounds[1] > 5.0);
    }

    #[test]
    fn empty_data_gets_unit_bounds() {
        let chart = CalibrationChart::fitted(&[], None, "x", "y");
        assert_eq!(chart.x_bounds, [0.0, 1.0]);
        assert_eq!(chart.y_bounds, [0.0, 1.0]);
    }

    #[test]
    fn tiny_area_renders_hint_instead_of_panicking() {
        let area = Rect::new(0, 0, 10, 4);
        let mut buf = Buffer::empty(area);
        CalibrationChart::fitted(&[(0.0, 0.0)], None, "x", "y").render(area, &mut buf);
        assert_eq!(buf[(0, 0)].symbol(), "C");
    }
}
