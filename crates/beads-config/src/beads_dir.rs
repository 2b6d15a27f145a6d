//! Discovery and layout of the `.beads/` workspace directory.
//!
//! A workspace is a directory containing `.beads/` with the database and the
//! committed manifest. Discovery walks up the directory tree; the
//! `BEADS_DIR` environment variable short-circuits it.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

/// The name of the beads metadata directory.
pub const BEADS_DIR_NAME: &str = ".beads";

/// Canonical manifest file name inside `.beads/`.
pub const MANIFEST_NAME: &str = "issues.jsonl";

/// Legacy manifest name, accepted on read.
pub const LEGACY_MANIFEST_NAME: &str = "beads.jsonl";

/// Legacy deletions side file, migrated to inline tombstones on first run.
pub const DELETIONS_NAME: &str = "deletions.jsonl";

/// The environment variable that can override the beads directory.
const BEADS_DIR_ENV: &str = "BEADS_DIR";

/// Walks up the directory tree from `start` looking for a `.beads/`
/// directory.
///
/// The `BEADS_DIR` environment variable is checked first. Returns `None`
/// if the filesystem root is reached without finding one.
pub fn find_beads_dir(start: &Path) -> Option<PathBuf> {
    if let Ok(env_dir) = std::env::var(BEADS_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        let candidate = current.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }
    None
}

/// Like [`find_beads_dir`], but converts `None` into
/// [`ConfigError::BeadsDirNotFound`].
pub fn find_beads_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_beads_dir(start).ok_or(ConfigError::BeadsDirNotFound)
}

/// Ensures a `.beads/` directory exists at the given path, creating it if
/// needed. Returns the path to the `.beads/` directory.
pub fn ensure_beads_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let beads_dir = if path.ends_with(BEADS_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(BEADS_DIR_NAME)
    };
    std::fs::create_dir_all(&beads_dir)?;
    Ok(beads_dir)
}

/// Returns the workspace root for a `.beads/` directory (its parent).
pub fn workspace_root(beads_dir: &Path) -> PathBuf {
    beads_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| beads_dir.to_path_buf())
}

/// Returns the manifest path, preferring the canonical name and falling
/// back to the legacy name when only it exists.
pub fn manifest_path(beads_dir: &Path) -> PathBuf {
    let canonical = beads_dir.join(MANIFEST_NAME);
    if canonical.exists() {
        return canonical;
    }
    let legacy = beads_dir.join(LEGACY_MANIFEST_NAME);
    if legacy.exists() {
        return legacy;
    }
    canonical
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_beads_dir_in_temp() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();

        let found = find_beads_dir(dir.path()).unwrap().canonicalize().unwrap();
        assert_eq!(found, beads.canonicalize().unwrap());
    }

    #[test]
    fn find_beads_dir_from_nested_child() {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();

        let child = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&child).unwrap();

        let found = find_beads_dir(&child).unwrap().canonicalize().unwrap();
        assert_eq!(found, beads.canonicalize().unwrap());
    }

    #[test]
    fn ensure_beads_dir_creates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let result1 = ensure_beads_dir(dir.path()).unwrap();
        let result2 = ensure_beads_dir(dir.path()).unwrap();
        assert!(result1.is_dir());
        assert!(result1.ends_with(".beads"));
        assert_eq!(result1, result2);
    }

    #[test]
    fn manifest_prefers_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        let beads = ensure_beads_dir(dir.path()).unwrap();

        // Nothing exists: canonical name returned.
        assert!(manifest_path(&beads).ends_with(MANIFEST_NAME));

        // Only legacy exists: it is used.
        std::fs::write(beads.join(LEGACY_MANIFEST_NAME), b"").unwrap();
        assert!(manifest_path(&beads).ends_with(LEGACY_MANIFEST_NAME));

        // Both exist: canonical wins.
        std::fs::write(beads.join(MANIFEST_NAME), b"").unwrap();
        assert!(manifest_path(&beads).ends_with(MANIFEST_NAME));
    }

    #[test]
    fn workspace_root_is_parent() {
        let dir = tempfile::tempdir().unwrap();
        let beads = ensure_beads_dir(dir.path()).unwrap();
        assert_eq!(workspace_root(&beads), dir.path());
    }
}
