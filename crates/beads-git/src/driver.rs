//! Merge-driver registration.
//!
//! The engine registers itself with the host repository so that merges of
//! the manifest are resolved by `bd merge-driver` instead of surfacing
//! textual conflicts: a driver entry in `.git/config` plus a pattern line
//! in `.gitattributes`.

use std::path::Path;

use crate::commands::{Result, git_command};

/// Name under which the driver is registered.
pub const DRIVER_NAME: &str = "beads";

/// The `.gitattributes` line mapping the manifest to the driver.
pub const ATTRIBUTES_LINE: &str = ".beads/*.jsonl merge=beads";

/// Registers the merge driver in the repository's local git config.
///
/// `%O %A %B` are base, ours, theirs; git replaces `%A` in place with the
/// merged result.
pub fn register_merge_driver(repo: &Path, bd_binary: &str) -> Result<()> {
    git_command(
        &[
            "config",
            &format!("merge.{DRIVER_NAME}.name"),
            "beads manifest merge driver",
        ],
        repo,
    )?;
    git_command(
        &[
            "config",
            &format!("merge.{DRIVER_NAME}.driver"),
            &format!("{bd_binary} merge-driver %O %A %B"),
        ],
        repo,
    )?;
    Ok(())
}

/// Ensures the `.gitattributes` at the repository root carries the driver
/// mapping. Appends the line if missing; never rewrites existing content.
pub fn ensure_gitattributes(repo: &Path) -> std::io::Result<()> {
    let path = repo.join(".gitattributes");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == ATTRIBUTES_LINE) {
        return Ok(());
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(ATTRIBUTES_LINE);
    content.push('\n');
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        git_command(&["init", "-q"], dir.path()).unwrap();

        register_merge_driver(dir.path(), "bd").unwrap();

        let driver = git_command(&["config", "merge.beads.driver"], dir.path()).unwrap();
        assert!(driver.contains("merge-driver"));
        assert!(driver.contains("%O %A %B"));
    }

    #[test]
    fn gitattributes_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        ensure_gitattributes(dir.path()).unwrap();
        ensure_gitattributes(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert_eq!(content.matches(ATTRIBUTES_LINE).count(), 1);
    }

    #[test]
    fn gitattributes_preserves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitattributes"), "*.png binary").unwrap();
        ensure_gitattributes(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert!(content.contains("*.png binary"));
        assert!(content.contains(ATTRIBUTES_LINE));
    }
}
