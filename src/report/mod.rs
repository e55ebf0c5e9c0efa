//! Terminal reports for conversion batches and calibration artifacts.

pub mod format;

pub use format::*;
