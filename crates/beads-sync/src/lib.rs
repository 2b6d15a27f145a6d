//! Synchronization between the database and the committed manifest:
//! freshness protocol, export/import, dirty tracking, and the auto-sync
//! engine.

pub mod dirty;
pub mod engine;
pub mod export;
pub mod freshness;
pub mod gitignore;
pub mod import;

pub use dirty::DirtyTracker;
pub use engine::{SyncEngine, SyncOptions, SyncReport};
pub use export::{ExportOutcome, export_to_manifest};
pub use freshness::{Freshness, evaluate_freshness, gate_write};
pub use import::{ImportOutcome, import_manifest};

use beads_storage::StorageError;

/// Errors from sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The database is behind the manifest; writing from it would lose
    /// data. Re-import first (or pass `allow_stale`).
    #[error("database is stale relative to the manifest; import first or pass --allow-stale")]
    StaleDatabase,

    /// The export would shrink the manifest ({db_count} issues in the
    /// database vs {manifest_count} in the manifest). A fresh clone with an
    /// empty database must import, not clobber.
    #[error(
        "refusing to export {db_count} issues over a manifest holding {manifest_count}; import first"
    )]
    ExportShrink {
        db_count: usize,
        manifest_count: usize,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("git failure: {0}")]
    Git(#[from] beads_git::GitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Jsonl(#[from] beads_core::jsonl::JsonlError),

    #[error(transparent)]
    Config(#[from] beads_config::ConfigError),
}

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
