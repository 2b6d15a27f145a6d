//! Manifest export: serialize the store to `.beads/issues.jsonl`.
//!
//! Exports are deterministic (issues ordered by id, byte-stable codec) and
//! atomic (temp file + rename, so the file watcher never sees a partial
//! write). The reverse zero-file-change guard refuses an export that would
//! shrink the manifest -- the classic fresh-clone-clobbers-manifest
//! pathology.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use beads_config::manifest_path;
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;
use beads_core::jsonl;
use beads_core::timefmt;
use beads_storage::Storage;
use beads_storage::sqlite::schema::meta_keys;

use crate::{Result, SyncError};

/// What an export did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The manifest was rewritten with this many issues.
    Written { count: usize },
    /// The store matches the manifest byte for byte; nothing was touched.
    Unchanged,
}

/// Hex SHA-256 of manifest bytes.
pub fn content_hash_of(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Loads every issue (tombstones included) with labels, dependencies, and
/// comments inlined, ordered by id.
pub fn collect_export(store: &dyn Storage) -> Result<Vec<Issue>> {
    let mut issues = store.search_issues("", &IssueFilter::everything())?;
    for issue in &mut issues {
        issue.labels = store.get_labels(&issue.id)?;
        issue.dependencies = store.get_dependency_records(&issue.id)?;
        let mut comments = store.get_comments(&issue.id)?;
        // Row ids are local; the manifest carries content only.
        for c in &mut comments {
            c.id = 0;
            c.issue_id = String::new();
        }
        issue.comments = comments;
    }
    Ok(issues)
}

/// Serialises the store to manifest bytes without touching disk.
pub fn manifest_bytes(store: &dyn Storage) -> Result<Vec<u8>> {
    let issues = collect_export(store)?;
    Ok(jsonl::to_jsonl_bytes(&issues)?)
}

/// Exports the store over the manifest.
///
/// With `force` unset, an export that would reduce the manifest's issue
/// count fails with [`SyncError::ExportShrink`]; callers import instead.
pub fn export_to_manifest(
    store: &dyn Storage,
    beads_dir: &Path,
    force: bool,
) -> Result<ExportOutcome> {
    let issues = collect_export(store)?;
    let bytes = jsonl::to_jsonl_bytes(&issues)?;
    let hash = content_hash_of(&bytes);

    let target = manifest_path(beads_dir);

    if target.exists() {
        let existing = std::fs::read(&target)?;
        if content_hash_of(&existing) == hash {
            debug!("export is a no-op; manifest already current");
            record_export(store, &hash)?;
            return Ok(ExportOutcome::Unchanged);
        }
        if !force {
            let manifest_count =
                jsonl::count_lines(std::io::BufReader::new(existing.as_slice()))?;
            if issues.len() < manifest_count {
                return Err(SyncError::ExportShrink {
                    db_count: issues.len(),
                    manifest_count,
                });
            }
        }
    }

    // Atomic rename so readers never observe a partial manifest.
    let mut tmp = tempfile::NamedTempFile::new_in(beads_dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(&target).map_err(|e| SyncError::Io(e.error))?;

    record_export(store, &hash)?;
    info!(count = issues.len(), path = %target.display(), "exported manifest");

    Ok(ExportOutcome::Written {
        count: issues.len(),
    })
}

/// Records export bookkeeping in metadata and clears the dirty bit.
fn record_export(store: &dyn Storage, hash: &str) -> Result<()> {
    store.set_metadata(meta_keys::LAST_EXPORT_HASH, hash)?;
    store.set_metadata(
        meta_keys::LAST_EXPORT_AT,
        &timefmt::format_ts(&chrono::Utc::now()),
    )?;
    store.set_metadata(meta_keys::DIRTY, "0")?;
    Ok(())
}
