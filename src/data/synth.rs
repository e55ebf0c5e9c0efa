//! Synthetic calibration dump generation.
//!
//! Produces a well-formed dump for one board: a voltage ladder line followed
//! by 32 blocks of 64 cell lines. Each cell gets its own pedestal and gain plus
//! a mild quadratic term, so `pol1` fits leave visible residual structure and
//! `pol2` fits absorb it.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::info;

use crate::domain::{BLOCKS_PER_BOARD, CELLS_NO, ChannelBlock};
use crate::error::AppError;

/// Default probe ladder: 0.0 to 1.0 V in 0.1 V steps.
pub fn default_probes() -> Vec<f64> {
    (0..=10).map(|i| i as f64 * 0.1).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub board: u32,
    pub probes: Vec<f64>,
    pub seed: u64,
    /// Gaussian noise on every code (ADC counts, 1 sigma).
    pub noise: f64,
    /// Directory receiving the dump.
    pub out: PathBuf,
}

/// File the dump for `config` is written to. The name carries the board id
/// in the form the parser expects.
pub fn synth_path(config: &SynthConfig) -> PathBuf {
    config.out.join(format!("synth_db{}.txt", config.board))
}

/// Render a dump as text.
pub fn render_dump(config: &SynthConfig) -> Result<String, AppError> {
    if config.probes.is_empty() {
        return Err(AppError::new(2, "At least one probe voltage is required."));
    }
    if config.probes.iter().any(|v| !v.is_finite()) {
        return Err(AppError::new(2, "Probe voltages must be finite."));
    }
    if !(config.noise.is_finite() && config.noise >= 0.0) {
        return Err(AppError::new(2, "Noise must be finite and >= 0."));
    }

    let mut rng = StdRng::seed_from_u64(synth_seed(config));
    let normal = Normal::new(0.0, 1.0).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "SAMPIC calibration dump (synthetic)");
    let _ = writeln!(out, "board {} | seed {} | noise {}", config.board, config.seed, config.noise);
    push_line(&mut out, config.probes.iter().map(|v| format!("{v:.4}")));

    for ordinal in 0..BLOCKS_PER_BOARD {
        let (sampic, channel) = ChannelBlock::position(ordinal);
        let _ = writeln!(out, "== SAMPIC {sampic} CHANNEL {channel} ==");
        for _ in 0..CELLS_NO {
            let pedestal = 180.0 + 15.0 * normal.sample(&mut rng);
            let gain = 1850.0 + 40.0 * normal.sample(&mut rng);
            let curvature = -60.0 + 5.0 * normal.sample(&mut rng);
            push_line(
                &mut out,
                config.probes.iter().map(|&v| {
                    let code = pedestal + gain * v + curvature * v * v + config.noise * normal.sample(&mut rng);
                    format!("{code:.2}")
                }),
            );
        }
    }

    Ok(out)
}

/// Render and write a dump; returns the written path.
pub fn write_dump(config: &SynthConfig) -> Result<PathBuf, AppError> {
    let text = render_dump(config)?;
    std::fs::create_dir_all(&config.out)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", config.out.display())))?;

    let path = synth_path(config);
    std::fs::write(&path, text).map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))?;
    info!(path = %path.display(), board = config.board, probes = config.probes.len(), "wrote synthetic dump");
    Ok(path)
}

/// Parse a comma separated probe list (`0,0.25,0.5`).
pub fn parse_probe_list(text: &str) -> Result<Vec<f64>, AppError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| AppError::new(2, format!("Invalid probe voltage '{s}': {e}")))
        })
        .collect()
}

/// Values separated by tabs; the trailing separator leaves an empty sentinel
/// field, as real dumps do.
fn push_line(out: &mut String, values: impl Iterator<Item = String>) {
    for v in values {
        out.push_str(&v);
        out.push('\t');
    }
    out.push('\n');
}

fn synth_seed(config: &SynthConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.board.hash(&mut hasher);
    config.seed.hash(&mut hasher);
    config.probes.len().hash(&mut hasher);
    hasher.finish()
}
