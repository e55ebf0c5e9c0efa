//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - layout constants of a SAMPIC board (`CELLS_NO`, `CHANNELS_NO`, ...)
//! - the parsed run record (`CalibrationRun`, `ChannelBlock`, ...)
//! - the persisted artifact (`CalibrationArtifact`, `ChannelCalibration`)
//! - conversion settings (`ConvertConfig`, `BoundPolicy`, `FitDomain`)

pub mod types;

pub use types::*;
