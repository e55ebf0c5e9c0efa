//! The conversion batch.
//!
//! Sequencing, per input path:
//! raw dump -> parse -> (shared fit domain) -> fit -> artifact -> write or merge
//!
//! Per-file failures (unreadable dump, failed fit, bad artifact) skip that file
//! and are reported; batch-level failures (formula, fit domain, merge conflict)
//! abort before anything is written.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{CalibrationArtifact, CalibrationRun, ConvertConfig, FitDomain};
use crate::error::AppError;
use crate::fit::{CurveFitter, emit_diagnostic, fit_run, resolve_bounds};
use crate::io::{derived_output_path, is_artifact_path, parse_run_file, read_artifact, with_artifact_suffix, write_artifact};
use crate::merge::{ExcludedArtifact, SourcedArtifact, merge_artifacts};
use crate::models::Formula;
use crate::plot::PlotSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A text dump to convert.
    Raw,
    /// An existing `.cal.json` artifact.
    Artifact,
}

pub fn classify(path: &Path) -> InputKind {
    if is_artifact_path(path) {
        InputKind::Artifact
    } else {
        InputKind::Raw
    }
}

/// An input that did not make it into the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: String,
}

/// An artifact file produced by the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    pub path: PathBuf,
    pub boards: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub written: Vec<Written>,
    pub skipped: Vec<Skipped>,
    pub excluded: Vec<ExcludedArtifact>,
    /// Resolved fit domain; `None` when no raw inputs were given.
    pub domain: Option<FitDomain>,
}

impl BatchOutput {
    fn skip(&mut self, path: &Path, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(path = %path.display(), %reason, "skipping input");
        self.skipped.push(Skipped {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// An artifact and its position in the input list (merge order follows input order).
struct Collected {
    index: usize,
    source: PathBuf,
    artifact: CalibrationArtifact,
    converted: bool,
}

/// Run one conversion batch.
pub fn run_batch(
    config: &ConvertConfig,
    fitter: &dyn CurveFitter,
    sink: Option<&mut dyn PlotSink>,
) -> Result<BatchOutput, AppError> {
    // 1) The formula is shared by every run in the batch.
    let formula = Formula::parse(config.conversion_formula())?;

    let mut batch = BatchOutput::default();
    let (raw, artifacts): (Vec<_>, Vec<_>) = config
        .inputs
        .iter()
        .enumerate()
        .partition(|(_, path)| classify(path) == InputKind::Raw);

    // 2) Existing artifacts.
    let mut collected = Vec::new();
    for (index, path) in artifacts {
        match read_artifact(path) {
            Ok(artifact) => collected.push(Collected {
                index,
                source: path.clone(),
                artifact,
                converted: false,
            }),
            Err(err) => batch.skip(path, err),
        }
    }

    // 3) Raw dumps, parsed in parallel; results keep input order.
    let parsed: Vec<(usize, &PathBuf, Result<CalibrationRun, _>)> = raw
        .par_iter()
        .map(|&(index, path)| (index, path, parse_run_file(path)))
        .collect();

    let mut sources = Vec::with_capacity(parsed.len());
    let mut runs = Vec::with_capacity(parsed.len());
    for (index, path, result) in parsed {
        match result {
            Ok(run) => {
                sources.push((index, path));
                runs.push(run);
            }
            Err(err) => batch.skip(path, err),
        }
    }

    if !raw.is_empty() {
        // 4) One domain for the whole batch.
        let domain = resolve_bounds(&runs, config.fit_from, config.fit_to, config.bound_policy)?;
        batch.domain = Some(domain);

        // 5) Optional diagnostic, before bulk fitting.
        if let (Some(request), Some(sink), Some(run)) = (config.plot, sink, runs.first()) {
            if let Err(err) = emit_diagnostic(run, request.block, &formula, domain, fitter, sink) {
                warn!(path = %sources[0].1.display(), error = %err, "diagnostic plot failed");
            }
        }

        // 6) Convert.
        for ((index, path), run) in sources.into_iter().zip(runs) {
            match fit_run(run, &formula, domain, fitter) {
                Ok(artifact) => collected.push(Collected {
                    index,
                    source: path.clone(),
                    artifact,
                    converted: true,
                }),
                Err(err) => batch.skip(path, err),
            }
        }
    }

    collected.sort_by_key(|c| c.index);

    // 7) Output.
    match &config.merge {
        Some(target) => write_merged(config, collected, target, &mut batch)?,
        None => write_each(config, collected, &mut batch)?,
    }

    info!(
        written = batch.written.len(),
        skipped = batch.skipped.len(),
        excluded = batch.excluded.len(),
        "batch finished"
    );
    Ok(batch)
}

fn write_merged(
    config: &ConvertConfig,
    collected: Vec<Collected>,
    target: &Path,
    batch: &mut BatchOutput,
) -> Result<(), AppError> {
    let Some(first) = collected.first() else {
        return Err(AppError::new(3, "Nothing to merge: no input produced an artifact."));
    };
    let target_formula = config
        .formula
        .clone()
        .unwrap_or_else(|| first.artifact.formula.clone());

    let inputs = collected
        .into_iter()
        .map(|c| SourcedArtifact {
            source: c.source,
            artifact: c.artifact,
        })
        .collect();

    let outcome = merge_artifacts(&target_formula, inputs)?;
    batch.excluded = outcome.excluded;
    if outcome.artifact.parameters.is_empty() {
        return Err(AppError::new(
            3,
            format!("Nothing to merge: no artifact uses formula '{target_formula}'."),
        ));
    }

    let path = with_artifact_suffix(target);
    write_artifact(&path, &outcome.artifact)?;
    info!(path = %path.display(), boards = outcome.artifact.parameters.len(), "wrote merged artifact");
    batch.written.push(Written {
        boards: outcome.artifact.board_ids().collect(),
        path,
    });
    Ok(())
}

fn write_each(config: &ConvertConfig, collected: Vec<Collected>, batch: &mut BatchOutput) -> Result<(), AppError> {
    let converted: Vec<Collected> = collected.into_iter().filter(|c| c.converted).collect();
    let single = converted.len() == 1;

    if let (Some(dir), false) = (&config.output, single) {
        if !converted.is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", dir.display())))?;
        }
    }

    for c in converted {
        let path = match &config.output {
            Some(p) if single => with_artifact_suffix(p),
            Some(dir) => {
                let derived = derived_output_path(&c.source);
                match derived.file_name() {
                    Some(name) => dir.join(name),
                    None => derived,
                }
            }
            None => derived_output_path(&c.source),
        };

        match write_artifact(&path, &c.artifact) {
            Ok(()) => {
                info!(input = %c.source.display(), output = %path.display(), "wrote artifact");
                batch.written.push(Written {
                    boards: c.artifact.board_ids().collect(),
                    path,
                });
            }
            Err(err) => batch.skip(&c.source, err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SynthConfig, default_probes, render_dump};
    use crate::domain::{BLOCKS_PER_BOARD, BoundPolicy, CELLS_NO, PlotRequest, PlotStyle};
    use crate::fit::LeastSquaresFitter;
    use crate::plot::AsciiPlotSink;

    fn write_raw(dir: &Path, name: &str, board: u32, probes: Vec<f64>) -> PathBuf {
        let cfg = SynthConfig {
            board,
            probes,
            seed: 7,
            noise: 0.5,
            out: dir.to_path_buf(),
        };
        let path = dir.join(name);
        std::fs::write(&path, render_dump(&cfg).unwrap()).unwrap();
        path
    }

    fn config(inputs: Vec<PathBuf>) -> ConvertConfig {
        ConvertConfig {
            inputs,
            formula: None,
            fit_from: None,
            fit_to: None,
            bound_policy: BoundPolicy::Batch,
            plot: None,
            merge: None,
            output: None,
        }
    }

    #[test]
    fn classify_by_suffix() {
        assert_eq!(classify(Path::new("a_db1.txt")), InputKind::Raw);
        assert_eq!(classify(Path::new("a_db1.cal.json")), InputKind::Artifact);
    }

    #[test]
    fn single_dump_converts_next_to_its_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_raw(dir.path(), "run_db5.txt", 5, vec![0.0, 1.0, 2.0]);

        let batch = run_batch(&config(vec![input]), &LeastSquaresFitter::default(), None).unwrap();
        assert!(batch.skipped.is_empty());
        assert_eq!(batch.domain, Some(FitDomain { from: 0.0, to: 2.0 }));

        let out = dir.path().join("run_db5.cal.json");
        assert_eq!(
            batch.written,
            vec![Written {
                path: out.clone(),
                boards: vec![5]
            }]
        );

        let artifact = read_artifact(&out).unwrap();
        assert_eq!(artifact.formula, "pol1");
        let records = &artifact.parameters[&5];
        assert_eq!(records.len(), BLOCKS_PER_BOARD);
        assert!(records.iter().all(|r| r.cells.len() == CELLS_NO && r.cells.iter().all(|p| p.len() == 2)));
    }

    #[test]
    fn merge_of_two_boards_has_both_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw(dir.path(), "run_db5.txt", 5, default_probes());
        let b = write_raw(dir.path(), "run_db7.txt", 7, default_probes());
        let merged = dir.path().join("merged");

        let mut cfg = config(vec![b, a]);
        cfg.merge = Some(merged.clone());
        let batch = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap();

        let path = dir.path().join("merged.cal.json");
        assert_eq!(batch.written.len(), 1);
        assert_eq!(batch.written[0].path, path);
        let artifact = read_artifact(&path).unwrap();
        assert_eq!(artifact.board_ids().collect::<Vec<_>>(), vec![5, 7]);

        // No per-run artifacts are written when merging.
        assert!(!dir.path().join("run_db5.cal.json").exists());
    }

    #[test]
    fn bad_inputs_are_skipped_and_the_rest_converts() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_raw(dir.path(), "run_db3.txt", 3, default_probes());
        let unnamed = dir.path().join("calibration.txt");
        std::fs::write(&unnamed, "0 1 \n").unwrap();
        let truncated = dir.path().join("short_db4.txt");
        std::fs::write(&truncated, "0 1 \n5 6 \n").unwrap();
        let broken_artifact = dir.path().join("old_db9.cal.json");
        std::fs::write(&broken_artifact, "{").unwrap();

        let inputs = vec![unnamed.clone(), good, truncated.clone(), broken_artifact.clone()];
        let batch = run_batch(&config(inputs), &LeastSquaresFitter::default(), None).unwrap();

        assert_eq!(batch.written.len(), 1);
        let skipped: Vec<&Path> = batch.skipped.iter().map(|s| s.path.as_path()).collect();
        assert_eq!(skipped.len(), 3);
        assert!(skipped.contains(&unnamed.as_path()));
        assert!(skipped.contains(&truncated.as_path()));
        assert!(skipped.contains(&broken_artifact.as_path()));
    }

    #[test]
    fn merge_conflict_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw(dir.path(), "first_db5.txt", 5, default_probes());
        let b = write_raw(dir.path(), "second_db5.txt", 5, default_probes());

        let mut cfg = config(vec![a, b]);
        cfg.merge = Some(dir.path().join("merged.cal.json"));
        let err = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(!dir.path().join("merged.cal.json").exists());
    }

    #[test]
    fn merge_excludes_artifacts_with_other_formulas() {
        let dir = tempfile::tempdir().unwrap();
        let raw = write_raw(dir.path(), "run_db1.txt", 1, default_probes());

        let mut other = CalibrationArtifact::empty("pol2");
        other.parameters.insert(2, Vec::new());
        let other_path = dir.path().join("old_db2.cal.json");
        write_artifact(&other_path, &other).unwrap();

        let mut cfg = config(vec![raw, other_path.clone()]);
        cfg.formula = Some("pol1".to_string());
        cfg.merge = Some(dir.path().join("all.cal.json"));
        let batch = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap();

        assert_eq!(
            batch.excluded,
            vec![ExcludedArtifact {
                source: other_path,
                formula: "pol2".to_string()
            }]
        );
        assert_eq!(batch.written[0].boards, vec![1]);
    }

    #[test]
    fn empty_merge_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let unnamed = dir.path().join("calibration.txt");
        std::fs::write(&unnamed, "").unwrap();

        let mut cfg = config(vec![unnamed]);
        cfg.fit_to = Some(1.0);
        cfg.merge = Some(dir.path().join("m"));
        let err = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn no_parsed_runs_without_fit_to_is_a_bound_error() {
        let dir = tempfile::tempdir().unwrap();
        let unnamed = dir.path().join("calibration.txt");
        std::fs::write(&unnamed, "").unwrap();

        let err = run_batch(&config(vec![unnamed]), &LeastSquaresFitter::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn invalid_formula_is_fatal_before_reading_inputs() {
        let mut cfg = config(vec![PathBuf::from("missing_db1.txt")]);
        cfg.formula = Some("[0] + ".to_string());
        let err = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn output_directory_receives_derived_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw(dir.path(), "run_db5.txt", 5, default_probes());
        let b = write_raw(dir.path(), "run_db7.txt", 7, default_probes());
        let out = dir.path().join("out");

        let mut cfg = config(vec![a, b]);
        cfg.output = Some(out.clone());
        run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap();

        assert!(out.join("run_db5.cal.json").exists());
        assert!(out.join("run_db7.cal.json").exists());
    }

    #[test]
    fn single_output_file_gets_the_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw(dir.path(), "run_db5.txt", 5, default_probes());

        let mut cfg = config(vec![a]);
        cfg.output = Some(dir.path().join("board5"));
        let batch = run_batch(&cfg, &LeastSquaresFitter::default(), None).unwrap();
        assert_eq!(batch.written[0].path, dir.path().join("board5.cal.json"));
    }

    #[test]
    fn diagnostic_plot_is_shown_once_for_the_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw(dir.path(), "run_db5.txt", 5, default_probes());
        let b = write_raw(dir.path(), "run_db7.txt", 7, default_probes());

        let mut cfg = config(vec![a, b]);
        cfg.plot = Some(PlotRequest {
            block: 3,
            style: PlotStyle::Ascii,
        });
        let mut sink = AsciiPlotSink::new(Vec::new(), 40, 10);
        run_batch(&cfg, &LeastSquaresFitter::default(), Some(&mut sink)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.matches("=== board 5 | sampic 1 | channel 3 | pol1 ===").count(), 1);
        assert!(!text.contains("board 7"));
    }
}
