//! Read/write calibration artifact files (`*.cal.json`).
//!
//! The artifact is the portable result of a conversion:
//!
//! ```text
//! {
//!   "formula": "pol1",
//!   "parameters": {
//!     "12": [{"sampic": 1, "channel": 0, "time_offset": 0.0, "cells": [[p0, p1], ...]}, ...]
//!   }
//! }
//! ```
//!
//! The schema is defined by `domain::CalibrationArtifact`. `formula` and
//! `parameters` are required; loading never invents them.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::{CHANNELS_NO, CalibrationArtifact, SAMPIC_NO};
use crate::error::ArtifactFormatError;

/// File name suffix that marks a calibration artifact.
pub const ARTIFACT_SUFFIX: &str = ".cal.json";

/// Serialize an artifact to its JSON text.
pub fn encode_artifact(artifact: &CalibrationArtifact) -> Result<String, ArtifactFormatError> {
    Ok(serde_json::to_string(artifact)?)
}

/// Parse and validate artifact JSON text.
pub fn decode_artifact(text: &str) -> Result<CalibrationArtifact, ArtifactFormatError> {
    let artifact: CalibrationArtifact = serde_json::from_str(text)?;
    validate(&artifact)?;
    Ok(artifact)
}

/// Write an artifact file.
pub fn write_artifact(path: &Path, artifact: &CalibrationArtifact) -> Result<(), ArtifactFormatError> {
    let io_err = |source| ArtifactFormatError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, artifact)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Read and validate an artifact file.
pub fn read_artifact(path: &Path) -> Result<CalibrationArtifact, ArtifactFormatError> {
    let file = File::open(path).map_err(|source| ArtifactFormatError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact: CalibrationArtifact = serde_json::from_reader(BufReader::new(file))?;
    validate(&artifact)?;
    Ok(artifact)
}

/// True for paths that name an artifact rather than a raw dump.
pub fn is_artifact_path(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(ARTIFACT_SUFFIX))
        .unwrap_or(false)
}

/// Default artifact location for a raw dump: same directory, extension
/// replaced by `.cal.json`.
pub fn derived_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "calibration".to_string());
    input.with_file_name(format!("{stem}{ARTIFACT_SUFFIX}"))
}

/// Append the artifact suffix unless the path already carries it.
pub fn with_artifact_suffix(path: &Path) -> PathBuf {
    if is_artifact_path(path) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(ARTIFACT_SUFFIX);
    PathBuf::from(name)
}

fn validate(artifact: &CalibrationArtifact) -> Result<(), ArtifactFormatError> {
    for (&board, records) in &artifact.parameters {
        for record in records {
            if usize::from(record.sampic) >= SAMPIC_NO {
                return Err(ArtifactFormatError::InvalidRecord {
                    board,
                    message: format!("sampic index {} out of range", record.sampic),
                });
            }
            if usize::from(record.channel) >= CHANNELS_NO {
                return Err(ArtifactFormatError::InvalidRecord {
                    board,
                    message: format!("channel index {} out of range", record.channel),
                });
            }
        }
    }
    Ok(())
}
