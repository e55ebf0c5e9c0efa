//! Formatted terminal output.
//!
//! Formatting lives in one place so the pipeline stays free of presentation
//! code and output changes stay localized.

use std::path::Path;

use crate::app::pipeline::BatchOutput;
use crate::domain::{CalibrationArtifact, ChannelCalibration};

/// Summary of one `convert` batch: domain, written files, skips, exclusions.
pub fn format_batch_summary(batch: &BatchOutput) -> String {
    let mut out = String::new();

    out.push_str("=== sampic-cal - conversion summary ===\n");
    match &batch.domain {
        Some(d) => out.push_str(&format!("Fit domain: [{:.4}, {:.4}]\n", d.from, d.to)),
        None => out.push_str("Fit domain: - (no raw inputs)\n"),
    }

    out.push_str(&format!("\nWritten ({}):\n", batch.written.len()));
    for w in &batch.written {
        out.push_str(&format!("  {}  boards={}\n", w.path.display(), fmt_boards(&w.boards)));
    }

    if !batch.skipped.is_empty() {
        out.push_str(&format!("\nSkipped ({}):\n", batch.skipped.len()));
        for s in &batch.skipped {
            out.push_str(&format!("  {}: {}\n", s.path.display(), s.reason));
        }
    }

    if !batch.excluded.is_empty() {
        out.push_str(&format!("\nExcluded from merge ({}):\n", batch.excluded.len()));
        for e in &batch.excluded {
            out.push_str(&format!("  {}: formula '{}'\n", e.source.display(), e.formula));
        }
    }

    out
}

/// Summary of an artifact: formula, then one row per board with coverage and
/// the mean of every parameter across the board's cells.
pub fn format_artifact_summary(path: &Path, artifact: &CalibrationArtifact) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== {} ===\n", path.display()));
    out.push_str(&format!("Formula: {}\n", artifact.formula));
    out.push_str(&format!("Boards: {}\n\n", artifact.parameters.len()));

    out.push_str(
        format!(
            "{:<8} {:>8} {:>8} {:>8} {:>8}  {}\n",
            "board", "records", "sampics", "cells", "params", "mean parameters"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<8} {:-<8} {:-<8} {:-<8}  {:-<15}\n", "", "", "", "", "", "").trim_end());
    out.push('\n');

    for (board, records) in &artifact.parameters {
        let mut sampics: Vec<u8> = records.iter().map(|r| r.sampic).collect();
        sampics.sort_unstable();
        sampics.dedup();
        let cells: usize = records.iter().map(|r| r.cells.len()).sum();
        let means = parameter_means(records);

        out.push_str(
            format!(
                "{:<8} {:>8} {:>8} {:>8} {:>8}  {}\n",
                board,
                records.len(),
                sampics.len(),
                cells,
                means.len(),
                fmt_vec(&means),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

/// Column means over every cell of `records`. Cells shorter than the widest
/// one only contribute to the columns they have.
fn parameter_means(records: &[ChannelCalibration]) -> Vec<f64> {
    let width = records
        .iter()
        .flat_map(|r| r.cells.iter().map(Vec::len))
        .max()
        .unwrap_or(0);
    let mut sums = vec![0.0; width];
    let mut counts = vec![0usize; width];
    for params in records.iter().flat_map(|r| r.cells.iter()) {
        for (i, p) in params.iter().enumerate() {
            sums[i] += p;
            counts[i] += 1;
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(s, n)| if n == 0 { f64::NAN } else { s / n as f64 })
        .collect()
}

fn fmt_boards(boards: &[u32]) -> String {
    let parts: Vec<String> = boards.iter().map(u32::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}
