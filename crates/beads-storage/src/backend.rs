//! Backend discovery: locating the database file inside `.beads/`.

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::sqlite::schema::DB_FILE_NAME;

/// Locates the database file inside a `.beads/` directory.
///
/// Returns the canonical path (`beads.db`), creating nothing. Multiple
/// `*.db` files are ambiguous and refuse to start.
pub fn find_database(beads_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(beads_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "db") {
                candidates.push(path);
            }
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Ok(beads_dir.join(DB_FILE_NAME)),
        1 => Ok(candidates.remove(0)),
        _ => Err(StorageError::NotInitialized {
            reason: format!(
                "multiple database files in {}: {}",
                beads_dir.display(),
                candidates
                    .iter()
                    .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dir_yields_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = find_database(dir.path()).unwrap();
        assert!(path.ends_with(DB_FILE_NAME));
    }

    #[test]
    fn single_db_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("legacy.db"), b"").unwrap();
        let path = find_database(dir.path()).unwrap();
        assert!(path.ends_with("legacy.db"));
    }

    #[test]
    fn multiple_dbs_refuse_to_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.db"), b"").unwrap();
        std::fs::write(dir.path().join("b.db"), b"").unwrap();
        let err = find_database(dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized { .. }));
    }
}
