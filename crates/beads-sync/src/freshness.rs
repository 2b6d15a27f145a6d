//! Staleness & freshness protocol: which side is the source of truth?
//!
//! Before every read/write cycle the engine compares the database's
//! would-be export (count + content hash) against the manifest on disk
//! (line count + streamed hash), using the last-export bookkeeping in
//! metadata to tell which side moved.

use std::path::Path;

use tracing::debug;

use beads_core::jsonl;
use beads_core::timefmt;
use beads_storage::Storage;
use beads_storage::sqlite::schema::meta_keys;

use crate::export::{content_hash_of, manifest_bytes};
use crate::{Result, SyncError};

/// Verdict of the freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Database and manifest agree; proceed.
    InSync,
    /// The manifest changed and the database did not: auto-import.
    ManifestWins,
    /// The database changed and the manifest did not: schedule export.
    DbWins,
    /// Both moved, or the counts disagree while the hashes collide;
    /// import is preferred (defensive).
    PreferImport,
}

impl Freshness {
    /// Returns `true` when an import should run before anything else.
    pub fn wants_import(&self) -> bool {
        matches!(self, Self::ManifestWins | Self::PreferImport)
    }

    /// Returns `true` when an export should run.
    pub fn wants_export(&self) -> bool {
        matches!(self, Self::DbWins)
    }
}

/// Evaluates which side is the source of truth.
pub fn evaluate_freshness(store: &dyn Storage, manifest: &Path) -> Result<Freshness> {
    let db_bytes = manifest_bytes(store)?;
    let db_hash = content_hash_of(&db_bytes);
    let db_count = jsonl::count_lines(std::io::BufReader::new(db_bytes.as_slice()))?;

    if !manifest.exists() {
        return Ok(if db_count > 0 {
            Freshness::DbWins
        } else {
            Freshness::InSync
        });
    }

    let manifest_bytes_on_disk = std::fs::read(manifest)?;
    let manifest_hash = content_hash_of(&manifest_bytes_on_disk);
    let manifest_count =
        jsonl::count_lines(std::io::BufReader::new(manifest_bytes_on_disk.as_slice()))?;

    if db_hash == manifest_hash {
        // Colliding-equal hashes with different counts cannot really happen;
        // prefer import if they somehow do.
        return Ok(if db_count == manifest_count {
            Freshness::InSync
        } else {
            Freshness::PreferImport
        });
    }

    // A fresh clone: empty database, populated manifest. The manifest wins
    // unconditionally (resurrection prevention).
    if db_count == 0 && manifest_count > 0 {
        return Ok(Freshness::ManifestWins);
    }

    let last_export_hash = store
        .get_metadata(meta_keys::LAST_EXPORT_HASH)
        .unwrap_or_default();
    let db_changed = db_hash != last_export_hash;
    let manifest_changed = manifest_hash != last_export_hash;

    let verdict = match (db_changed, manifest_changed) {
        (true, false) => Freshness::DbWins,
        (false, true) => Freshness::ManifestWins,
        (false, false) => Freshness::InSync,
        (true, true) => {
            // Both moved since the last export; whichever moved later wins.
            let last_export_at = store
                .get_metadata(meta_keys::LAST_EXPORT_AT)
                .ok()
                .and_then(|s| timefmt::parse_ts(&s).ok());
            let manifest_mtime = std::fs::metadata(manifest)
                .and_then(|m| m.modified())
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from);
            match (last_export_at, manifest_mtime) {
                (Some(exported), Some(mtime)) if mtime > exported => Freshness::ManifestWins,
                (Some(_), Some(_)) => Freshness::DbWins,
                _ => Freshness::PreferImport,
            }
        }
    };

    debug!(?verdict, db_count, manifest_count, "freshness check");
    Ok(verdict)
}

/// Gates a write: a command that would export out of a stale database is
/// blocked unless the caller explicitly allows it.
pub fn gate_write(store: &dyn Storage, manifest: &Path, allow_stale: bool) -> Result<()> {
    if allow_stale {
        return Ok(());
    }
    if evaluate_freshness(store, manifest)?.wants_import() {
        return Err(SyncError::StaleDatabase);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_to_manifest;
    use beads_core::issue::IssueBuilder;
    use beads_storage::SqliteStore;

    fn create(store: &SqliteStore, id: &str) {
        store
            .create_issue_impl(&IssueBuilder::new(format!("issue {id}")).id(id).build(), "a")
            .unwrap();
    }

    #[test]
    fn empty_everything_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let verdict =
            evaluate_freshness(&store, &dir.path().join("issues.jsonl")).unwrap();
        assert_eq!(verdict, Freshness::InSync);
    }

    #[test]
    fn exported_store_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        create(&store, "bd-aa111");
        export_to_manifest(&store, dir.path(), false).unwrap();

        let verdict =
            evaluate_freshness(&store, &dir.path().join("issues.jsonl")).unwrap();
        assert_eq!(verdict, Freshness::InSync);
    }

    #[test]
    fn db_write_after_export_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        create(&store, "bd-aa111");
        export_to_manifest(&store, dir.path(), false).unwrap();
        create(&store, "bd-bb111");

        let verdict =
            evaluate_freshness(&store, &dir.path().join("issues.jsonl")).unwrap();
        assert_eq!(verdict, Freshness::DbWins);
    }

    #[test]
    fn manifest_edit_after_export_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        create(&store, "bd-aa111");
        export_to_manifest(&store, dir.path(), false).unwrap();

        // Someone (a pull, another clone) rewrites the manifest.
        let manifest = dir.path().join("issues.jsonl");
        let mut content = std::fs::read_to_string(&manifest).unwrap();
        content.push_str("{\"id\":\"bd-ext11\",\"title\":\"from elsewhere\"}\n");
        std::fs::write(&manifest, content).unwrap();

        let verdict = evaluate_freshness(&store, &manifest).unwrap();
        assert_eq!(verdict, Freshness::ManifestWins);
    }

    #[test]
    fn fresh_clone_manifest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let populated = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            create(&populated, &format!("bd-p{i}{i}{i}{i}"));
        }
        export_to_manifest(&populated, dir.path(), false).unwrap();

        // Fresh clone: empty database next to a populated manifest.
        let empty = SqliteStore::open_in_memory().unwrap();
        let verdict =
            evaluate_freshness(&empty, &dir.path().join("issues.jsonl")).unwrap();
        assert_eq!(verdict, Freshness::ManifestWins);
    }

    #[test]
    fn write_gate_blocks_stale_database() {
        let dir = tempfile::tempdir().unwrap();
        let populated = SqliteStore::open_in_memory().unwrap();
        create(&populated, "bd-aa111");
        export_to_manifest(&populated, dir.path(), false).unwrap();

        let empty = SqliteStore::open_in_memory().unwrap();
        let manifest = dir.path().join("issues.jsonl");

        let err = gate_write(&empty, &manifest, false).unwrap_err();
        assert!(matches!(err, SyncError::StaleDatabase));

        // Explicit override is honored.
        gate_write(&empty, &manifest, true).unwrap();
    }
}
