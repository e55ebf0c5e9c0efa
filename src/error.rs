//! Error types.
//!
//! Each pipeline stage has its own `thiserror` enum so callers can decide what
//! is fatal to a single file and what is fatal to the whole batch. At the binary
//! boundary everything collapses into [`AppError`], which carries the process
//! exit code:
//!
//! - `2`: usage, input and I/O problems
//! - `3`: data problems (bounds, merge conflicts)
//! - `4`: terminal / plotting problems

use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Structural problems in a raw calibration dump. Fatal to that one file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read error after line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("no board id in file name '{name}' (expected digits after an underscore, e.g. `_db12`)")]
    MissingBoardId { name: String },

    #[error("line {line}: voltage reference row has no values")]
    EmptyVoltageReference { line: usize },

    #[error("line {line}: invalid value '{token}'")]
    InvalidValue { line: usize, token: String },

    #[error("line {line}: expected {expected} probe values, got {actual}")]
    ProbeCount {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt file or wrong layout: expected {expected} channel blocks, got {actual}")]
    BlockCount { expected: usize, actual: usize },
}

/// Problems turning a formula string into an evaluable expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("empty formula")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("parameter index {index} out of range (at most {max} parameters)")]
    TooManyParameters { index: usize, max: usize },

    #[error("formula has no fit parameters (use [0], [1], ... or a shortcut such as pol1)")]
    NoParameters,
}

/// Why the fit capability could not produce parameters for one cell.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitFailure {
    #[error("x and y have different lengths ({x} vs {y})")]
    LengthMismatch { x: usize, y: usize },

    #[error("{points} point(s) inside the fit domain for {params} parameter(s)")]
    Underdetermined { points: usize, params: usize },

    #[error("least squares system is singular")]
    Singular,

    #[error("no convergence after {iterations} iterations")]
    NoConvergence { iterations: usize },

    #[error("model produced a non-finite value")]
    NonFinite,

    #[error("fitter returned {actual} parameters, formula has {expected}")]
    ParameterCount { expected: usize, actual: usize },
}

/// A cell fit failure, located in the run. Fatal to that file's conversion.
#[derive(Debug, Clone, Error)]
#[error("board {board} sampic {sampic} channel {channel} cell {cell}: {source}")]
pub struct FitError {
    pub board: u32,
    pub sampic: u8,
    pub channel: u8,
    pub cell: usize,
    #[source]
    pub source: FitFailure,
}

/// Fit domain resolution problems. Fatal to the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundError {
    #[error("no successfully parsed run to derive the fit domain from")]
    NoRuns,

    #[error("invalid fit domain [{from}, {to}]")]
    InvalidDomain { from: f64, to: f64 },
}

/// Problems loading or storing a calibration artifact.
#[derive(Debug, Error)]
pub enum ArtifactFormatError {
    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid artifact JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("board {board}: {message}")]
    InvalidRecord { board: u32, message: String },
}

/// The same board appeared in two artifacts being merged.
#[derive(Debug, Clone, Error)]
#[error("board {board} appears in both '{}' and '{}'", first.display(), second.display())]
pub struct MergeConflictError {
    pub board: u32,
    pub first: PathBuf,
    pub second: PathBuf,
}

/// Diagnostic plotting failures. Never affect artifacts.
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),

    #[error("block {block} out of range (run has {blocks} blocks)")]
    BlockOutOfRange { block: usize, blocks: usize },

    #[error("diagnostic fit failed: {0}")]
    Fit(#[from] FitFailure),
}

impl From<FormulaError> for AppError {
    fn from(err: FormulaError) -> Self {
        AppError::new(2, format!("Invalid formula: {err}"))
    }
}

impl From<BoundError> for AppError {
    fn from(err: BoundError) -> Self {
        AppError::new(3, format!("Cannot resolve fit domain: {err}"))
    }
}

impl From<MergeConflictError> for AppError {
    fn from(err: MergeConflictError) -> Self {
        AppError::new(3, format!("Merge conflict: {err}"))
    }
}

impl From<ArtifactFormatError> for AppError {
    fn from(err: ArtifactFormatError) -> Self {
        AppError::new(2, err.to_string())
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::new(2, err.to_string())
    }
}

impl From<PlotError> for AppError {
    fn from(err: PlotError) -> Self {
        AppError::new(4, format!("Plot error: {err}"))
    }
}
