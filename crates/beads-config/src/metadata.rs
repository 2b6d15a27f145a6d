//! `.beads/metadata.json` -- the backend/fingerprint side file.
//!
//! Read before the database is opened: the daemon checks the backend's
//! capability flags and the workspace fingerprint (cross-clone-reuse guard)
//! here, not in the database itself.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ConfigError, Result};

/// File name inside `.beads/`.
pub const METADATA_FILE: &str = "metadata.json";

/// Workspace metadata persisted beside the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    /// Storage backend identifier (`"sqlite"`).
    pub backend: String,

    /// Random fingerprint minted at init. Copying a `.beads/` directory
    /// between clones trips the mismatch check at daemon startup.
    pub fingerprint: String,

    /// Schema version hint, for diagnostics before the database opens.
    #[serde(default)]
    pub schema_version: i32,
}

impl WorkspaceMetadata {
    /// Creates metadata for a fresh workspace.
    pub fn new(backend: &str, fingerprint: &str, schema_version: i32) -> Self {
        Self {
            backend: backend.to_string(),
            fingerprint: fingerprint.to_string(),
            schema_version,
        }
    }
}

/// Loads metadata from `.beads/metadata.json`. Returns `Ok(None)` when the
/// file does not exist (pre-metadata workspaces).
pub fn load_metadata(beads_dir: &Path) -> Result<Option<WorkspaceMetadata>> {
    let path = beads_dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let meta: WorkspaceMetadata =
        serde_json::from_str(&content).map_err(|e| ConfigError::InvalidValue {
            key: METADATA_FILE.into(),
            reason: e.to_string(),
        })?;
    Ok(Some(meta))
}

/// Saves metadata to `.beads/metadata.json`.
pub fn save_metadata(beads_dir: &Path, meta: &WorkspaceMetadata) -> Result<()> {
    std::fs::create_dir_all(beads_dir)?;
    let path = beads_dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(meta).map_err(|e| ConfigError::InvalidValue {
        key: METADATA_FILE.into(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, json)?;
    Ok(())
}
