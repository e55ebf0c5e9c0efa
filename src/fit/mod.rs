//! Calibration fitting.
//!
//! Responsibilities:
//!
//! - resolve the shared fit domain for a batch (`bounds`)
//! - the per-cell fitting capability (`fitter`)
//! - fit every cell of a run into an artifact (`orchestrator`)

pub mod bounds;
pub mod fitter;
pub mod orchestrator;

pub use bounds::*;
pub use fitter::*;
pub use orchestrator::*;
