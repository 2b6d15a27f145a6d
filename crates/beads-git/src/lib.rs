//! Git integration for the beads synchronization engine.

pub mod commands;
pub mod driver;
pub mod gitdir;

pub use commands::{GitError, git_command, is_permission_denied};
pub use gitdir::{find_git_root, is_git_repo};
