//! Git repository discovery and user identity.

use crate::commands::{GitError, git_command};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Walks up the directory tree from `start` looking for a `.git` directory
/// (or `.git` file, as used by git worktrees).
///
/// Returns the repository root (the parent of `.git`), or `None` if the
/// filesystem root is reached first. Purely filesystem-based; for an answer
/// that respects submodules use [`get_git_root_via_command`].
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        // .git can be a directory (regular repo) or a file (worktree).
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }
    None
}

/// Returns `true` if `path` is inside a git repository.
pub fn is_git_repo(path: &Path) -> bool {
    find_git_root(path).is_some()
}

/// Returns the repository root via `git rev-parse --show-toplevel`.
pub fn get_git_root_via_command(cwd: &Path) -> Option<PathBuf> {
    git_command(&["rev-parse", "--show-toplevel"], cwd)
        .ok()
        .map(PathBuf::from)
}

/// Retrieves `user.name` from git configuration, if set.
pub fn get_git_user_name() -> Option<String> {
    let output = Command::new("git")
        .args(["config", "user.name"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// Retrieves `user.email` from git configuration, if set.
pub fn get_git_user_email() -> Option<String> {
    let output = Command::new("git")
        .args(["config", "user.email"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let email = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!email.is_empty()).then_some(email)
}

/// Returns `true` if `cwd` is inside a linked worktree rather than the main
/// working tree. `Err` if not in a git repository at all.
pub fn is_worktree(cwd: &Path) -> std::result::Result<bool, GitError> {
    let git_dir = git_command(&["rev-parse", "--git-dir"], cwd)?;
    let common_dir = git_command(&["rev-parse", "--git-common-dir"], cwd)?;

    let abs_git = Path::new(&git_dir)
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(&git_dir));
    let abs_common = Path::new(&common_dir)
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(&common_dir));

    Ok(abs_git != abs_common)
}
