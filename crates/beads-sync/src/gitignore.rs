//! Auto-generated `.beads/.gitignore`.
//!
//! The manifest is committed; the database and daemon runtime files are
//! not. The file is upgraded in place: missing entries are appended, user
//! additions are preserved.

use std::path::Path;

/// Entries every workspace ignores.
const REQUIRED_ENTRIES: &[&str] = &[
    "*.db",
    "*.db-wal",
    "*.db-shm",
    "daemon.lock",
    "daemon.log",
    "daemon.pid",
    "bd.sock",
    "sync-backoff.json",
    "crash-*.log",
    "*.migrated",
];

/// Creates or upgrades `.beads/.gitignore`, appending any missing entries.
pub fn ensure_gitignore(beads_dir: &Path) -> std::io::Result<()> {
    let path = beads_dir.join(".gitignore");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    let present: Vec<&str> = existing.lines().map(str::trim).collect();

    let missing: Vec<&str> = REQUIRED_ENTRIES
        .iter()
        .copied()
        .filter(|e| !present.contains(e))
        .collect();
    if missing.is_empty() && !existing.is_empty() {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in missing {
        content.push_str(entry);
        content.push('\n');
    }
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_full_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        ensure_gitignore(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        for entry in REQUIRED_ENTRIES {
            assert!(content.contains(entry), "missing {entry}");
        }
    }

    #[test]
    fn upgrade_appends_only_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.db\nmy-custom-entry\n").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(content.contains("my-custom-entry"));
        assert_eq!(content.matches("*.db\n").count(), 1);
        assert!(content.contains("daemon.lock"));
    }

    #[test]
    fn idempotent() {
        let dir = tempfile::tempdir().unwrap();
        ensure_gitignore(dir.path()).unwrap();
        let first = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        ensure_gitignore(dir.path()).unwrap();
        let second = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(first, second);
    }
}
