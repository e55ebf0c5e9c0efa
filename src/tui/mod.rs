//! Ratatui-based diagnostic viewer.
//!
//! Shows the three diagnostic views of one channel block side by side and
//! blocks until the user dismisses it (`q`, `Esc` or `Enter`).

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::error::PlotError;
use crate::plot::{DiagnosticPlot, PlotSink};

mod plotters_chart;

use plotters_chart::CalibrationChart;

/// Interactive terminal sink.
#[derive(Debug, Default)]
pub struct TerminalPlotSink;

impl PlotSink for TerminalPlotSink {
    fn show(&mut self, plot: &DiagnosticPlot) -> Result<(), PlotError> {
        let _guard = TerminalGuard::new()?;

        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;

        let view = DiagnosticView::new(plot);
        view.event_loop(&mut terminal)
    }
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, PlotError> {
        enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(PlotError::Terminal(e));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

/// Series prepared once; redraws only lay them out.
struct DiagnosticView<'a> {
    plot: &'a DiagnosticPlot,
    raw: Vec<(f64, f64)>,
    zero_line: Vec<(f64, f64)>,
}

impl<'a> DiagnosticView<'a> {
    fn new(plot: &'a DiagnosticPlot) -> Self {
        let zero_line = crate::plot::finite_range(plot.residuals.iter().map(|&(x, _)| x))
            .map(|(lo, hi)| vec![(lo, 0.0), (hi, 0.0)])
            .unwrap_or_default();
        Self {
            plot,
            raw: plot.raw_points(),
            zero_line,
        }
    }

    fn event_loop<B: ratatui::backend::Backend>(&self, terminal: &mut Terminal<B>) -> Result<(), PlotError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))? {
                continue;
            }

            match event::read()? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter) {
                        break;
                    }
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn draw(&self, frame: &mut ratatui::Frame<'_>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0), Constraint::Length(3)])
            .split(frame.area());

        self.draw_header(frame, chunks[0]);

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
            ])
            .split(chunks[1]);

        let raw_title = format!("Raw ({} cells)", self.plot.cells.len());
        draw_pane(
            frame,
            panes[0],
            &raw_title,
            CalibrationChart::fitted(&self.raw, None, "voltage", "code"),
        );
        draw_pane(
            frame,
            panes[1],
            "Fit (first cell)",
            CalibrationChart::fitted(&self.plot.fit_points, Some(self.plot.curve.as_slice()), "voltage", "code"),
        );
        draw_pane(
            frame,
            panes[2],
            "Residuals",
            CalibrationChart::fitted(&self.plot.residuals, Some(self.zero_line.as_slice()), "voltage", "data - fit"),
        );

        draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let params = self
            .plot
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{i}]={p:.6e}"))
            .collect::<Vec<_>>()
            .join("  ");
        let lines = vec![
            Line::from(Span::styled(self.plot.title.clone(), Style::default().fg(Color::Cyan))),
            Line::from(Span::styled(params, Style::default().fg(Color::Gray))),
        ];
        let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

fn draw_pane(frame: &mut ratatui::Frame<'_>, area: Rect, title: &str, chart: CalibrationChart<'_>) {
    let block = Block::default().title(title.to_string()).borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(Clear, inner);
    frame.render_widget(chart, inner);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: Rect) {
    let line = Line::from(Span::styled(
        "q / Esc / Enter: continue with conversion",
        Style::default().fg(Color::Gray),
    ));
    let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    frame.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;

    use super::*;

    fn plot() -> DiagnosticPlot {
        DiagnosticPlot {
            title: "board 5 | sampic 1 | channel 3 | pol1".to_string(),
            voltage: vec![0.0, 0.5, 1.0],
            cells: vec![vec![10.0, 15.0, 20.0], vec![11.0, 16.0, 21.0]],
            fit_points: vec![(0.0, 10.0), (0.5, 15.0), (1.0, 20.0)],
            curve: vec![(0.0, 10.0), (1.0, 20.0)],
            residuals: vec![(0.0, 0.0), (0.5, 0.0), (1.0, 0.0)],
            params: vec![10.0, 10.0],
        }
    }

    #[test]
    fn draws_header_and_panes_on_test_backend() {
        let plot = plot();
        let view = DiagnosticView::new(&plot);
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| view.draw(f)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("board 5 | sampic 1 | channel 3 | pol1"));
        assert!(text.contains("Raw (2 cells)"));
        assert!(text.contains("Residuals"));
    }

    #[test]
    fn zero_line_spans_residual_voltages() {
        let plot = plot();
        let view = DiagnosticView::new(&plot);
        assert_eq!(view.zero_line, vec![(0.0, 0.0), (1.0, 0.0)]);
        assert_eq!(view.raw.len(), 6);
    }
}
