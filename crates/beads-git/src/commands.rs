//! Git command execution wrappers.
//!
//! A thin layer over `git` subprocess invocation so the rest of the
//! codebase never touches `std::process::Command` directly. Higher-level
//! helpers cover the sync engine's needs: stage/commit the manifest, push,
//! fetch, pull, upstream detection.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when running git commands.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be found or spawned.
    #[error("failed to execute git: {0}")]
    SpawnError(#[from] std::io::Error),

    /// The git command exited with a non-zero status.
    #[error("git command failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        /// The exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
        /// The content of stderr.
        stderr: String,
    },

    /// The remote rejected the operation for lack of permission. Treated as
    /// transient: surfaced once, never retried in a loop.
    #[error("permission denied by remote: {0}")]
    PermissionDenied(String),

    /// No upstream is configured for the current branch.
    #[error("no upstream configured for branch {branch}")]
    NoUpstream { branch: String },

    /// Not inside a git repository.
    #[error("not a git repository")]
    NotARepo,
}

/// A specialized `Result` type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Stderr fragments that indicate a permission failure rather than a
/// transient network or merge problem.
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "403",
    "could not read username",
    "authentication failed",
    "publickey",
    "access denied",
];

/// Classifies stderr from a failed push/pull.
pub fn is_permission_denied(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    PERMISSION_MARKERS.iter().any(|m| lower.contains(m))
}

// ---------------------------------------------------------------------------
// Low-level execution
// ---------------------------------------------------------------------------

/// Executes a `git` command with the given arguments and working directory.
///
/// Returns the trimmed contents of stdout on success.
pub fn git_command(args: &[&str], cwd: &Path) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_permission_denied(&stderr) {
            return Err(GitError::PermissionDenied(stderr));
        }
        return Err(GitError::CommandFailed {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ---------------------------------------------------------------------------
// Sync-engine helpers
// ---------------------------------------------------------------------------

/// Stages the given paths. Only manifest files under `.beads/` are ever
/// passed here; other staged changes are never touched.
pub fn add_paths(repo: &Path, paths: &[&str]) -> Result<()> {
    let mut args = vec!["add", "--"];
    args.extend_from_slice(paths);
    git_command(&args, repo).map(|_| ())
}

/// Commits the given paths with the given message. Limiting the commit to
/// a pathspec keeps the user's other staged changes out of sync commits.
/// A clean index (nothing to commit) is not an error.
pub fn commit(
    repo: &Path,
    message: &str,
    author: Option<&str>,
    no_gpg_sign: bool,
    paths: &[&str],
) -> Result<()> {
    let mut args: Vec<&str> = vec!["commit", "-m", message];
    if let Some(author) = author {
        args.push("--author");
        args.push(author);
    }
    if no_gpg_sign {
        args.push("--no-gpg-sign");
    }
    if !paths.is_empty() {
        args.push("--");
        args.extend_from_slice(paths);
    }
    match git_command(&args, repo) {
        Ok(_) => Ok(()),
        // git reports a clean tree on stdout with exit code 1; stderr stays
        // empty (or repeats the "nothing to commit" phrasing).
        Err(GitError::CommandFailed { code, stderr })
            if stderr.contains("nothing to commit")
                || stderr.contains("no changes added to commit")
                || (code == Some(1) && stderr.is_empty()) =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Returns `true` if any of the given paths have staged or unstaged changes.
pub fn has_changes(repo: &Path, paths: &[&str]) -> Result<bool> {
    let mut args = vec!["status", "--porcelain", "--"];
    args.extend_from_slice(paths);
    let out = git_command(&args, repo)?;
    Ok(!out.is_empty())
}

/// Returns the current branch name.
pub fn current_branch(repo: &Path) -> Result<String> {
    git_command(&["rev-parse", "--abbrev-ref", "HEAD"], repo)
}

/// Returns the upstream of the given branch, or [`GitError::NoUpstream`].
pub fn upstream_of(repo: &Path, branch: &str) -> Result<String> {
    let refspec = format!("{branch}@{{upstream}}");
    git_command(
        &["rev-parse", "--abbrev-ref", "--symbolic-full-name", &refspec],
        repo,
    )
    .map_err(|e| match e {
        GitError::CommandFailed { .. } => GitError::NoUpstream {
            branch: branch.to_string(),
        },
        other => other,
    })
}

/// Pushes the given branch to its upstream (or origin).
pub fn push(repo: &Path, branch: &str) -> Result<()> {
    git_command(&["push", "origin", branch], repo).map(|_| ())
}

/// Fetches from origin.
pub fn fetch(repo: &Path) -> Result<()> {
    git_command(&["fetch", "origin"], repo).map(|_| ())
}

/// Pulls the current branch from its upstream. Merge conflicts on the
/// manifest are handled by the registered merge driver, not here.
pub fn pull(repo: &Path) -> Result<()> {
    git_command(&["pull", "--no-rebase"], repo).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
