//! Configuration types and loading.
//!
//! [`BeadsConfig`] models `.beads/config.yaml` -- the side file read before
//! the database is opened. Database-stored config overrides it for
//! non-startup keys; environment variables override both for whitelisted
//! keys; an explicit flag wins over everything. See [`resolve_value`].

use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Config layering failed.
    #[error("failed to load config: {0}")]
    LayerError(#[from] Box<figment::Error>),

    /// The `.beads/` directory was not found.
    #[error("no .beads directory found (run 'bd init' first)")]
    BeadsDirNotFound,

    /// A configuration value was invalid.
    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Sync configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Optional dedicated branch for beads-owned commits. Empty means
    /// commit on the current branch.
    #[serde(default)]
    pub branch: String,

    /// Stage and commit the manifest after export.
    #[serde(default = "default_true", rename = "auto-commit")]
    pub auto_commit: bool,

    /// Push after committing (requires a configured upstream).
    #[serde(default, rename = "auto-push")]
    pub auto_push: bool,

    /// Fetch and re-import on the daemon's periodic tick.
    #[serde(default, rename = "auto-pull")]
    pub auto_pull: bool,

    /// Seconds to debounce between a write and the flush that exports it.
    #[serde(default = "default_debounce", rename = "debounce-seconds")]
    pub debounce_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            branch: String::new(),
            auto_commit: true,
            auto_push: false,
            auto_pull: false,
            debounce_seconds: default_debounce(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce() -> u64 {
    5
}

/// Git-related configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitConfig {
    /// Override commit author (e.g., `"beads-bot <beads@example.com>"`).
    #[serde(default)]
    pub author: String,

    /// Disable GPG signing for beads commits.
    #[serde(default, rename = "no-gpg-sign")]
    pub no_gpg_sign: bool,
}

/// Daemon configuration section. Startup-only: the daemon reads these before
/// the database is opened, so they live in the side file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between periodic sync ticks.
    #[serde(default = "default_tick", rename = "tick-seconds")]
    pub tick_seconds: u64,

    /// Seconds between manifest watcher polls.
    #[serde(default = "default_watch", rename = "watch-seconds")]
    pub watch_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
            watch_seconds: default_watch(),
        }
    }
}

fn default_tick() -> u64 {
    30
}

fn default_watch() -> u64 {
    2
}

/// Custom types configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TypesConfig {
    /// Comma-separated list of custom issue types registered at startup.
    #[serde(default)]
    pub custom: String,
}

/// Custom statuses configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusConfig {
    /// Comma-separated list of custom statuses.
    #[serde(default)]
    pub custom: String,

    /// Comma-separated custom statuses that count as ready work.
    #[serde(default)]
    pub ready: String,
}

// ---------------------------------------------------------------------------
// Main config struct
// ---------------------------------------------------------------------------

/// The full beads configuration, corresponding to `.beads/config.yaml`.
///
/// All fields use serde defaults so a partially-specified YAML file
/// deserializes with sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeadsConfig {
    /// Issue ID prefix (e.g., `"bd"`). Validated at init.
    #[serde(default, rename = "issue-prefix")]
    pub prefix: Option<String>,

    /// Actor identity override.
    #[serde(default)]
    pub actor: Option<String>,

    /// Custom issue types.
    #[serde(default)]
    pub types: TypesConfig,

    /// Custom statuses.
    #[serde(default)]
    pub status: StatusConfig,

    /// Sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Git-related configuration.
    #[serde(default)]
    pub git: GitConfig,

    /// Daemon configuration (startup-only).
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl BeadsConfig {
    /// Returns custom types as trimmed, non-empty strings.
    pub fn custom_types(&self) -> Vec<String> {
        parse_comma_list(&self.types.custom)
    }

    /// Returns custom statuses as trimmed, non-empty strings.
    pub fn custom_statuses(&self) -> Vec<String> {
        parse_comma_list(&self.status.custom)
    }

    /// Returns the custom statuses that count as ready work.
    pub fn ready_statuses(&self) -> Vec<String> {
        parse_comma_list(&self.status.ready)
    }

    /// Validates the configured issue prefix: lowercase alphanumerics and
    /// hyphens, no leading/trailing hyphen, 1-32 bytes.
    pub fn validate_prefix(prefix: &str) -> Result<()> {
        let ok = !prefix.is_empty()
            && prefix.len() <= 32
            && !prefix.starts_with('-')
            && !prefix.ends_with('-')
            && prefix
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                key: "issue-prefix".into(),
                reason: format!(
                    "'{prefix}' must be 1-32 lowercase alphanumerics/hyphens, not starting or ending with a hyphen"
                ),
            })
        }
    }

    /// Looks up a flat config key in the side file ("sync.branch" form).
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "issue-prefix" => self.prefix.clone(),
            "actor" => self.actor.clone(),
            "types.custom" => Some(self.types.custom.clone()),
            "status.custom" => Some(self.status.custom.clone()),
            "status.ready" => Some(self.status.ready.clone()),
            "sync.branch" => Some(self.sync.branch.clone()),
            "sync.auto_commit" => Some(self.sync.auto_commit.to_string()),
            "sync.auto_push" => Some(self.sync.auto_push.to_string()),
            "sync.auto_pull" => Some(self.sync.auto_pull.to_string()),
            "sync.debounce_seconds" => Some(self.sync.debounce_seconds.to_string()),
            "git.author" => Some(self.git.author.clone()),
            _ => None,
        }
    }
}

/// Parses a comma-separated string into trimmed, non-empty strings.
fn parse_comma_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Loading and saving
// ---------------------------------------------------------------------------

/// Loads configuration from `config.yaml` inside the given `.beads/`
/// directory, layered over defaults. A missing or empty file yields the
/// defaults.
pub fn load_config(beads_dir: &Path) -> Result<BeadsConfig> {
    let config_path = beads_dir.join("config.yaml");

    let figment = Figment::from(Serialized::defaults(BeadsConfig::default()))
        .merge(Yaml::file(&config_path));
    let config: BeadsConfig = figment.extract().map_err(Box::new)?;
    Ok(config)
}

/// Saves configuration to `config.yaml` inside the given `.beads/`
/// directory, creating the directory if needed.
pub fn save_config(beads_dir: &Path, config: &BeadsConfig) -> Result<()> {
    std::fs::create_dir_all(beads_dir)?;
    let config_path = beads_dir.join("config.yaml");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Environment overrides and precedence
// ---------------------------------------------------------------------------

/// Config keys the environment may override.
pub const ENV_WHITELIST: &[&str] = &[
    "issue-prefix",
    "actor",
    "sync.branch",
    "sync.auto_commit",
    "sync.auto_push",
    "sync.auto_pull",
    "sync.debounce_seconds",
];

/// Maps a config key to its environment variable name:
/// `sync.auto_push` -> `BEADS_SYNC_AUTO_PUSH`.
pub fn env_var_for_key(key: &str) -> String {
    let mut name = String::from("BEADS_");
    for c in key.chars() {
        match c {
            '.' | '-' => name.push('_'),
            c => name.push(c.to_ascii_uppercase()),
        }
    }
    name
}

/// Returns the environment override for a key, if whitelisted and set.
pub fn env_override(key: &str) -> Option<String> {
    if !ENV_WHITELIST.contains(&key) {
        return None;
    }
    std::env::var(env_var_for_key(key)).ok().filter(|v| !v.is_empty())
}

/// Resolves a config value by the precedence chain:
/// explicit flag > environment > database config > side file.
pub fn resolve_value(
    key: &str,
    flag: Option<&str>,
    db_config: &HashMap<String, String>,
    side: &BeadsConfig,
) -> Option<String> {
    if let Some(v) = flag {
        return Some(v.to_string());
    }
    if let Some(v) = env_override(key) {
        return Some(v);
    }
    if let Some(v) = db_config.get(key) {
        return Some(v.clone());
    }
    side.lookup(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = BeadsConfig::default();
        assert!(cfg.prefix.is_none());
        assert!(cfg.sync.auto_commit);
        assert!(!cfg.sync.auto_push);
        assert_eq!(cfg.sync.debounce_seconds, 5);
        assert!(cfg.custom_types().is_empty());
    }

    #[test]
    fn load_missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert!(cfg.prefix.is_none());
        assert_eq!(cfg.daemon.tick_seconds, 30);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().unwrap();
        let beads_dir = dir.path().join(".beads");

        let mut cfg = BeadsConfig::default();
        cfg.prefix = Some("myproj".to_string());
        cfg.types.custom = "spike, adr".to_string();
        cfg.sync.auto_push = true;

        save_config(&beads_dir, &cfg).unwrap();
        let loaded = load_config(&beads_dir).unwrap();

        assert_eq!(loaded.prefix.as_deref(), Some("myproj"));
        assert_eq!(loaded.custom_types(), vec!["spike", "adr"]);
        assert!(loaded.sync.auto_push);
    }

    #[test]
    fn partial_yaml_gets_defaults() {
        let yaml = "issue-prefix: proj\nsync:\n  auto-push: true\n";
        let cfg: BeadsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.prefix.as_deref(), Some("proj"));
        assert!(cfg.sync.auto_push);
        assert!(cfg.sync.auto_commit);
        assert_eq!(cfg.sync.debounce_seconds, 5);
    }

    #[test]
    fn prefix_validation() {
        assert!(BeadsConfig::validate_prefix("bd").is_ok());
        assert!(BeadsConfig::validate_prefix("my-project").is_ok());
        assert!(BeadsConfig::validate_prefix("").is_err());
        assert!(BeadsConfig::validate_prefix("-bad").is_err());
        assert!(BeadsConfig::validate_prefix("bad-").is_err());
        assert!(BeadsConfig::validate_prefix("UPPER").is_err());
        assert!(BeadsConfig::validate_prefix(&"x".repeat(33)).is_err());
    }

    #[test]
    fn env_var_mapping() {
        assert_eq!(env_var_for_key("sync.auto_push"), "BEADS_SYNC_AUTO_PUSH");
        assert_eq!(env_var_for_key("issue-prefix"), "BEADS_ISSUE_PREFIX");
    }

    #[test]
    fn precedence_chain() {
        let side = BeadsConfig {
            prefix: Some("side".into()),
            ..Default::default()
        };
        let mut db = HashMap::new();

        // Side file only.
        assert_eq!(
            resolve_value("issue-prefix", None, &db, &side).as_deref(),
            Some("side")
        );

        // Database beats side file.
        db.insert("issue-prefix".to_string(), "db".to_string());
        assert_eq!(
            resolve_value("issue-prefix", None, &db, &side).as_deref(),
            Some("db")
        );

        // Flag beats everything.
        assert_eq!(
            resolve_value("issue-prefix", Some("flag"), &db, &side).as_deref(),
            Some("flag")
        );
    }

    #[test]
    fn non_whitelisted_key_ignores_env() {
        // git.author is not whitelisted: env never applies.
        assert!(env_override("git.author").is_none());
    }
}
