//! Shared domain types.
//!
//! Two families live here:
//!
//! - the in-memory run record produced by the dump parser (`CalibrationRun` and
//!   its blocks), which is consumed by conversion and never persisted
//! - the persisted calibration artifact (`CalibrationArtifact`), which is
//!   serializable and is what gets merged and written to disk

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Sampling cells per channel.
pub const CELLS_NO: usize = 64;
/// Channels per SAMPIC chip.
pub const CHANNELS_NO: usize = 16;
/// SAMPIC chips per board.
pub const SAMPIC_NO: usize = 2;
/// Channel blocks a complete dump carries for one board.
pub const BLOCKS_PER_BOARD: usize = CHANNELS_NO * SAMPIC_NO;

/// The reference voltage ladder applied during calibration, one value per probe.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageReference {
    pub values: Vec<f64>,
}

impl VoltageReference {
    pub fn probes(&self) -> usize {
        self.values.len()
    }

    /// Largest reference voltage (`None` for an empty ladder).
    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }
}

/// Raw digital codes of one cell, one per probe step.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSample {
    pub codes: Vec<f64>,
}

/// All cells of one channel of one SAMPIC chip.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBlock {
    pub board_id: u32,
    pub sampic: u8,
    pub channel: u8,
    /// Exactly `CELLS_NO` samples, in emission order.
    pub cells: Vec<CellSample>,
}

impl ChannelBlock {
    /// Channel coordinates for the `ordinal`-th block of a dump.
    ///
    /// Dumps enumerate all channels of sampic 1 first, then sampic 0.
    pub fn position(ordinal: usize) -> (u8, u8) {
        let sampic = 1 - (ordinal / CHANNELS_NO) as u8;
        let channel = (ordinal % CHANNELS_NO) as u8;
        (sampic, channel)
    }
}

/// One parsed calibration dump.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRun {
    pub voltage: VoltageReference,
    pub boards: BTreeMap<u32, Vec<ChannelBlock>>,
}

impl CalibrationRun {
    /// Blocks of every board, in board order then file order.
    pub fn blocks(&self) -> impl Iterator<Item = &ChannelBlock> {
        self.boards.values().flatten()
    }

    pub fn block_count(&self) -> usize {
        self.boards.values().map(Vec::len).sum()
    }
}

/// Fitted parameters of one cell, in formula parameter order.
pub type FitResult = Vec<f64>;

/// Calibration of one channel in a persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub sampic: u8,
    pub channel: u8,
    /// Placeholder carried through unchanged.
    #[serde(default)]
    pub time_offset: f64,
    pub cells: Vec<FitResult>,
}

/// The persisted calibration unit (`*.cal.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub formula: String,
    pub parameters: BTreeMap<u32, Vec<ChannelCalibration>>,
}

impl CalibrationArtifact {
    pub fn empty(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn board_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.parameters.keys().copied()
    }
}

/// Closed interval of reference voltages a fit is restricted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitDomain {
    pub from: f64,
    pub to: f64,
}

impl FitDomain {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.from && x <= self.to
    }
}

/// How user bounds are reconciled with the voltage ladders of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BoundPolicy {
    /// Explicit bounds are used as given; only missing bounds are derived.
    #[default]
    Batch,
    /// Clamp `from` to `>= 0` and `to` to the ladder maximum (single-run tooling).
    Legacy,
}

/// Which diagnostic plot renderer to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlotStyle {
    /// Interactive terminal UI, dismissed with a key press.
    #[default]
    Terminal,
    /// Plain text printed to stdout.
    Ascii,
}

/// Diagnostic plot request for a conversion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotRequest {
    /// Block ordinal within the dump (`0..BLOCKS_PER_BOARD`).
    pub block: usize,
    pub style: PlotStyle,
}

/// A conversion batch as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub inputs: Vec<PathBuf>,
    /// Formula used to fit raw runs; also the merge target when set.
    pub formula: Option<String>,
    pub fit_from: Option<f64>,
    pub fit_to: Option<f64>,
    pub bound_policy: BoundPolicy,
    pub plot: Option<PlotRequest>,
    pub merge: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Default formula for raw runs: a straight line.
pub const DEFAULT_FORMULA: &str = "pol1";

impl ConvertConfig {
    pub fn conversion_formula(&self) -> &str {
        self.formula.as_deref().unwrap_or(DEFAULT_FORMULA)
    }
}
