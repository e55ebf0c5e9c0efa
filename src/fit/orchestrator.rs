//! Run conversion: fit every cell of a parsed run.
//!
//! Cells carry no data dependency on each other, so they are fitted in
//! parallel; results are collected back in block/cell order before the artifact
//! is assembled. One failing cell fails the whole run.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::domain::{
    CalibrationArtifact, CalibrationRun, CellSample, ChannelBlock, ChannelCalibration, FitDomain, FitResult,
    VoltageReference,
};
use crate::error::{FitError, FitFailure, PlotError};
use crate::fit::fitter::{CurveFitter, FitRequest, residuals};
use crate::models::Formula;
use crate::plot::{DiagnosticPlot, PlotSink};

/// Points used to draw the fitted curve in diagnostics.
const CURVE_SAMPLES: usize = 200;

/// Convert a run into a calibration artifact.
pub fn fit_run(
    run: CalibrationRun,
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
) -> Result<CalibrationArtifact, FitError> {
    let x = sorted(&run.voltage.values);
    let mut artifact = CalibrationArtifact::empty(formula.source());

    for (&board, blocks) in &run.boards {
        debug!(board, blocks = blocks.len(), "fitting board");
        let records = blocks
            .par_iter()
            .map(|block| fit_block(block, &x, formula, domain, fitter))
            .collect::<Result<Vec<_>, _>>()?;
        artifact.parameters.insert(board, records);
    }

    info!(
        boards = artifact.parameters.len(),
        formula = formula.source(),
        "run converted"
    );
    Ok(artifact)
}

fn fit_block(
    block: &ChannelBlock,
    x: &[f64],
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
) -> Result<ChannelCalibration, FitError> {
    let cells = block
        .cells
        .par_iter()
        .enumerate()
        .map(|(idx, cell)| {
            fit_sorted(x, &sorted(&cell.codes), formula, domain, fitter).map_err(|source| FitError {
                board: block.board_id,
                sampic: block.sampic,
                channel: block.channel,
                cell: idx,
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChannelCalibration {
        sampic: block.sampic,
        channel: block.channel,
        time_offset: 0.0,
        cells,
    })
}

/// Fit one cell against the voltage ladder.
///
/// Voltages and codes are sorted ascending *independently* before pairing;
/// this assumes both are monotonically associated by construction.
pub fn fit_cell(
    voltage: &VoltageReference,
    cell: &CellSample,
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
) -> Result<FitResult, FitFailure> {
    fit_sorted(&sorted(&voltage.values), &sorted(&cell.codes), formula, domain, fitter)
}

fn fit_sorted(
    x: &[f64],
    y: &[f64],
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
) -> Result<FitResult, FitFailure> {
    let params = fitter.fit(&FitRequest { formula, domain, x, y })?;
    if params.len() != formula.param_count() {
        return Err(FitFailure::ParameterCount {
            expected: formula.param_count(),
            actual: params.len(),
        });
    }
    Ok(params)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

/// Build the diagnostic view for the `block`-th block of a run (file order):
/// raw series of all its cells, plus the fit of its first cell.
pub fn build_diagnostic(
    run: &CalibrationRun,
    block: usize,
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
) -> Result<DiagnosticPlot, PlotError> {
    let blocks = run.block_count();
    let Some(selected) = run.blocks().nth(block) else {
        return Err(PlotError::BlockOutOfRange { block, blocks });
    };
    let Some(first) = selected.cells.first() else {
        return Err(PlotError::BlockOutOfRange { block, blocks });
    };

    let fit_x = sorted(&run.voltage.values);
    let fit_y = sorted(&first.codes);
    let params = fit_sorted(&fit_x, &fit_y, formula, domain, fitter)?;

    let curve = (0..CURVE_SAMPLES)
        .map(|i| {
            let u = i as f64 / (CURVE_SAMPLES as f64 - 1.0);
            let v = domain.from + u * (domain.to - domain.from);
            (v, formula.eval(v, &params))
        })
        .collect();

    let residual = fit_x
        .iter()
        .copied()
        .zip(residuals(formula, &params, &fit_x, &fit_y))
        .filter(|&(v, _)| domain.contains(v))
        .collect();

    Ok(DiagnosticPlot {
        title: format!(
            "board {} | sampic {} | channel {} | {}",
            selected.board_id,
            selected.sampic,
            selected.channel,
            formula.source()
        ),
        voltage: run.voltage.values.clone(),
        cells: selected.cells.iter().map(|c| c.codes.clone()).collect(),
        fit_points: fit_x.into_iter().zip(fit_y).collect(),
        curve,
        residuals: residual,
        params,
    })
}

/// Build the diagnostic for one block and hand it to `sink`.
pub fn emit_diagnostic(
    run: &CalibrationRun,
    block: usize,
    formula: &Formula,
    domain: FitDomain,
    fitter: &dyn CurveFitter,
    sink: &mut dyn PlotSink,
) -> Result<(), PlotError> {
    let plot = build_diagnostic(run, block, formula, domain, fitter)?;
    debug!(title = %plot.title, "showing diagnostic plot");
    sink.show(&plot)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::{BLOCKS_PER_BOARD, CELLS_NO};
    use crate::fit::LeastSquaresFitter;

    /// Codes follow `offset + gain * v` with per-cell offsets.
    fn linear_run(board: u32, voltage: &[f64]) -> CalibrationRun {
        let blocks = (0..BLOCKS_PER_BOARD)
            .map(|ordinal| {
                let (sampic, channel) = ChannelBlock::position(ordinal);
                let cells = (0..CELLS_NO)
                    .map(|cell| CellSample {
                        codes: voltage
                            .iter()
                            .map(|v| 100.0 + cell as f64 + 500.0 * v)
                            .collect(),
                    })
                    .collect();
                ChannelBlock {
                    board_id: board,
                    sampic,
                    channel,
                    cells,
                }
            })
            .collect();
        CalibrationRun {
            voltage: VoltageReference {
                values: voltage.to_vec(),
            },
            boards: BTreeMap::from([(board, blocks)]),
        }
    }

    #[test]
    fn pol1_run_yields_two_parameters_per_cell() {
        let run = linear_run(3, &[0.0, 1.0, 2.0]);
        let formula = Formula::parse("pol1").unwrap();
        let domain = FitDomain { from: 0.0, to: 2.0 };
        let artifact = fit_run(run, &formula, domain, &LeastSquaresFitter::default()).unwrap();

        assert_eq!(artifact.formula, "pol1");
        let records = &artifact.parameters[&3];
        assert_eq!(records.len(), BLOCKS_PER_BOARD);
        for record in records {
            assert_eq!(record.cells.len(), CELLS_NO);
            assert_eq!(record.time_offset, 0.0);
            for params in &record.cells {
                assert_eq!(params.len(), 2);
            }
        }

        // Record order mirrors block order.
        assert_eq!((records[0].sampic, records[0].channel), (1, 0));
        assert_eq!((records[31].sampic, records[31].channel), (0, 15));

        // Cell order is preserved: intercept tracks the per-cell offset.
        let cell7 = &records[5].cells[7];
        assert!((cell7[0] - 107.0).abs() < 1e-9);
        assert!((cell7[1] - 500.0).abs() < 1e-9);
    }

    #[test]
    fn voltage_and_codes_are_sorted_independently() {
        let voltage = VoltageReference {
            values: vec![2.0, 0.0, 1.0],
        };
        let cell = CellSample {
            codes: vec![30.0, 10.0, 20.0],
        };
        let formula = Formula::parse("pol1").unwrap();
        let p = fit_cell(
            &voltage,
            &cell,
            &formula,
            FitDomain { from: 0.0, to: 2.0 },
            &LeastSquaresFitter::default(),
        )
        .unwrap();
        assert!((p[0] - 10.0).abs() < 1e-9);
        assert!((p[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn one_failing_cell_fails_the_run() {
        struct FailOn(usize);
        impl CurveFitter for FailOn {
            fn fit(&self, request: &FitRequest<'_>) -> Result<FitResult, FitFailure> {
                // Cell index is recoverable from the synthetic offsets.
                if (request.y[0] - 100.0).round() as usize == self.0 {
                    return Err(FitFailure::NoConvergence { iterations: 1 });
                }
                Ok(vec![0.0; request.formula.param_count()])
            }
        }

        let run = linear_run(9, &[0.0, 1.0, 2.0]);
        let formula = Formula::parse("pol1").unwrap();
        let err = fit_run(run, &formula, FitDomain { from: 0.0, to: 2.0 }, &FailOn(42)).unwrap_err();
        assert_eq!(err.board, 9);
        assert_eq!(err.cell, 42);
        assert_eq!(err.source, FitFailure::NoConvergence { iterations: 1 });
    }

    #[test]
    fn wrong_parameter_count_is_an_error() {
        struct TooMany;
        impl CurveFitter for TooMany {
            fn fit(&self, _: &FitRequest<'_>) -> Result<FitResult, FitFailure> {
                Ok(vec![0.0; 5])
            }
        }

        let run = linear_run(1, &[0.0, 1.0]);
        let formula = Formula::parse("pol1").unwrap();
        let err = fit_run(run, &formula, FitDomain { from: 0.0, to: 1.0 }, &TooMany).unwrap_err();
        assert_eq!(err.source, FitFailure::ParameterCount { expected: 2, actual: 5 });
    }

    #[test]
    fn diagnostic_covers_all_cells_of_the_block() {
        let run = linear_run(2, &[0.0, 0.5, 1.0]);
        let formula = Formula::parse("pol1").unwrap();
        let domain = FitDomain { from: 0.0, to: 1.0 };
        let plot = build_diagnostic(&run, 17, &formula, domain, &LeastSquaresFitter::default()).unwrap();

        assert_eq!(plot.cells.len(), CELLS_NO);
        assert_eq!(plot.voltage, vec![0.0, 0.5, 1.0]);
        assert_eq!(plot.curve.len(), CURVE_SAMPLES);
        assert_eq!(plot.residuals.len(), 3);
        assert!(plot.residuals.iter().all(|&(_, r)| r.abs() < 1e-9));
        assert!(plot.title.contains("sampic 0 | channel 1"));

        let err = build_diagnostic(&run, 32, &formula, domain, &LeastSquaresFitter::default()).unwrap_err();
        assert!(matches!(err, PlotError::BlockOutOfRange { block: 32, blocks: 32 }));
    }

    #[test]
    fn emit_diagnostic_hands_one_plot_to_the_sink() {
        struct Recorder(Vec<DiagnosticPlot>);
        impl PlotSink for Recorder {
            fn show(&mut self, plot: &DiagnosticPlot) -> Result<(), PlotError> {
                self.0.push(plot.clone());
                Ok(())
            }
        }

        let run = linear_run(2, &[0.0, 1.0]);
        let formula = Formula::parse("pol1").unwrap();
        let mut sink = Recorder(Vec::new());
        emit_diagnostic(
            &run,
            0,
            &formula,
            FitDomain { from: 0.0, to: 1.0 },
            &LeastSquaresFitter::default(),
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.0.len(), 1);
        assert!((sink.0[0].params[1] - 500.0).abs() < 1e-9);
    }
}
