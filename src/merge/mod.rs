//! Combining per-board artifacts into one.
//!
//! Every input is expected to carry boards no other input carries. A board
//! seen twice is a hard error: an artifact is never silently overwritten, and
//! nothing is produced when a conflict is found.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::domain::CalibrationArtifact;
use crate::error::MergeConflictError;

/// An artifact together with where it came from (for reporting).
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedArtifact {
    pub source: PathBuf,
    pub artifact: CalibrationArtifact,
}

/// An input left out of the merge because its formula differs from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedArtifact {
    pub source: PathBuf,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub artifact: CalibrationArtifact,
    pub excluded: Vec<ExcludedArtifact>,
}

/// Merge all inputs fitted with `target_formula` into one artifact.
pub fn merge_artifacts(
    target_formula: &str,
    inputs: Vec<SourcedArtifact>,
) -> Result<MergeOutcome, MergeConflictError> {
    let mut merged = CalibrationArtifact::empty(target_formula);
    let mut owners: BTreeMap<u32, PathBuf> = BTreeMap::new();
    let mut excluded = Vec::new();

    for SourcedArtifact { source, artifact } in inputs {
        if artifact.formula != target_formula {
            warn!(
                source = %source.display(),
                formula = %artifact.formula,
                target = target_formula,
                "excluding artifact with a different formula from merge"
            );
            excluded.push(ExcludedArtifact {
                source,
                formula: artifact.formula,
            });
            continue;
        }

        for (board, records) in artifact.parameters {
            match merged.parameters.entry(board) {
                Entry::Occupied(_) => {
                    let first = owners.get(&board).cloned().unwrap_or_default();
                    return Err(MergeConflictError {
                        board,
                        first,
                        second: source,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(records);
                    owners.insert(board, source.clone());
                }
            }
        }
        debug!(source = %source.display(), "merged artifact");
    }

    Ok(MergeOutcome {
        artifact: merged,
        excluded,
    })
}
