//! Runtime context for command execution.

use std::env;
use std::path::PathBuf;
use std::process::Command;

use crate::cli::GlobalArgs;

/// Runtime context resolved once in `main`, before dispatch.
#[derive(Debug)]
pub struct RuntimeContext {
    /// Resolved `.beads` directory, if any.
    pub beads_dir: Option<PathBuf>,

    /// Actor name for the audit trail.
    pub actor: String,

    /// Allow operations on potentially stale data.
    pub allow_stale: bool,

    /// Read-only mode: block write operations.
    pub readonly: bool,

    /// Verbose output.
    pub verbose: bool,
}

impl RuntimeContext {
    /// Builds a context from parsed global arguments.
    pub fn from_global_args(global: &GlobalArgs) -> Self {
        let beads_dir = global.beads_dir.clone().or_else(|| {
            env::current_dir()
                .ok()
                .and_then(|cwd| beads_config::find_beads_dir(&cwd))
        });

        Self {
            beads_dir,
            actor: resolve_actor(global.actor.as_deref()),
            allow_stale: global.allow_stale,
            readonly: global.readonly,
            verbose: global.verbose,
        }
    }

    /// The `.beads` directory, or a not-a-workspace error.
    pub fn require_beads_dir(&self) -> Result<&PathBuf, beads_config::ConfigError> {
        self.beads_dir
            .as_ref()
            .ok_or(beads_config::ConfigError::BeadsDirNotFound)
    }
}

/// Resolves the actor name.
///
/// Priority: explicit flag > BEADS_ACTOR env > git config user.name >
/// USER env > "unknown".
fn resolve_actor(flag_value: Option<&str>) -> String {
    if let Some(actor) = flag_value {
        if !actor.is_empty() {
            return actor.to_string();
        }
    }

    if let Ok(actor) = env::var("BEADS_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = Command::new("git").args(["config", "user.name"]).output() {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = env::var("USER").or_else(|_| env::var("USERNAME")) {
        if !user.is_empty() {
            return user;
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_actor_with_flag() {
        assert_eq!(resolve_actor(Some("alice")), "alice");
    }

    #[test]
    fn resolve_actor_never_empty() {
        assert!(!resolve_actor(None).is_empty());
        assert!(!resolve_actor(Some("")).is_empty());
    }
}
