//! Three-way merge driver for the beads manifest.
//!
//! The VCS hands the driver three file versions (base, ours, theirs); the
//! driver writes a merged manifest in place of ours and never surfaces a
//! textual conflict to the user.

pub mod driver;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::warn;

use beads_core::jsonl;

pub use driver::{MergeResult, MergeWarning, merge_issues};

/// Errors from the file-level merge entry point.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write merged result to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("jsonl error: {0}")]
    Jsonl(#[from] jsonl::JsonlError),
}

/// Merges three manifest files and writes the result over `output`
/// (conventionally the "ours" path, matching the VCS driver contract).
///
/// Corrupt lines in any input are skipped with a logged warning, matching
/// the import path's behavior. Returns the in-memory result so callers can
/// report warnings and lossiness.
pub fn merge_files(
    base: &Path,
    ours: &Path,
    theirs: &Path,
    output: &Path,
) -> Result<MergeResult, MergeError> {
    let base_issues = read_side(base)?;
    let ours_issues = read_side(ours)?;
    let theirs_issues = read_side(theirs)?;

    let result = merge_issues(base_issues, ours_issues, theirs_issues);

    for warning in &result.warnings {
        warn!(issue = %warning.id, "{}", warning.message);
    }

    let bytes = jsonl::to_jsonl_bytes(&result.issues)?;
    std::fs::write(output, bytes).map_err(|source| MergeError::Write {
        path: output.display().to_string(),
        source,
    })?;

    Ok(result)
}

fn read_side(path: &Path) -> Result<Vec<beads_core::issue::Issue>, MergeError> {
    // A missing side is an empty manifest (e.g. the file is new on a branch).
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|source| MergeError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let (issues, warnings) = jsonl::read_jsonl_lenient(BufReader::new(file))?;
    for w in warnings {
        warn!(path = %path.display(), "{w}");
    }
    Ok(issues)
}
