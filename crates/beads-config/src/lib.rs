//! Configuration for the beads synchronization engine: `.beads/` discovery,
//! the `config.yaml` side file, `metadata.json`, and the environment
//! override chain.

pub mod beads_dir;
pub mod config;
pub mod metadata;

pub use beads_dir::{
    BEADS_DIR_NAME, DELETIONS_NAME, LEGACY_MANIFEST_NAME, MANIFEST_NAME, ensure_beads_dir,
    find_beads_dir, find_beads_dir_or_error, manifest_path, workspace_root,
};
pub use config::{
    BeadsConfig, ConfigError, ENV_WHITELIST, env_override, env_var_for_key, load_config,
    resolve_value, save_config,
};
pub use metadata::{METADATA_FILE, WorkspaceMetadata, load_metadata, save_metadata};
