//! Daemon startup protocol.
//!
//! Before binding the socket the daemon: acquires the workspace lock,
//! validates the backend and workspace fingerprint, refuses ambiguous
//! database layouts, opens the store (which validates and migrates the
//! schema), loads config, and cleans up any stale socket.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use beads_config::{BeadsConfig, WorkspaceMetadata, load_config, load_metadata, save_metadata};
use beads_lockfile::WorkspaceLock;
use beads_storage::sqlite::schema::{CURRENT_SCHEMA_VERSION, meta_keys};
use beads_storage::{BackendKind, SqliteStore, StorageError, find_database};

use crate::socket::{PID_FILE_NAME, cleanup_stale_socket, socket_path};

/// Errors during daemon startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("workspace lock: {0}")]
    Lock(#[from] beads_lockfile::LockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] beads_config::ConfigError),

    #[error("unknown storage backend '{0}' in metadata.json")]
    UnknownBackend(String),

    #[error(
        "workspace fingerprint mismatch: the database belongs to another clone \
         (expected {expected}, found {found}); remove .beads/beads.db or metadata.json"
    )]
    FingerprintMismatch { expected: String, found: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the running daemon owns.
#[derive(Debug)]
pub struct DaemonContext {
    pub store: SqliteStore,
    pub config: BeadsConfig,
    pub beads_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Held for the daemon's lifetime; released on drop.
    pub lock: WorkspaceLock,
}

impl DaemonContext {
    /// Path of the pid file.
    pub fn pid_file(&self) -> PathBuf {
        self.beads_dir.join(PID_FILE_NAME)
    }
}

/// Runs the startup protocol for the given `.beads/` directory.
pub fn startup(beads_dir: &Path) -> Result<DaemonContext, StartupError> {
    // One daemon per workspace.
    let lock = WorkspaceLock::acquire(beads_dir)?;

    let config = load_config(beads_dir)?;

    // Backend capability check happens before the database opens.
    let metadata = load_metadata(beads_dir)?;
    let backend = match &metadata {
        Some(meta) => BackendKind::parse(&meta.backend)
            .ok_or_else(|| StartupError::UnknownBackend(meta.backend.clone()))?,
        None => BackendKind::Sqlite,
    };
    // The embedded backend is single-process; the workspace lock we hold is
    // exactly that guarantee.
    let _caps = backend.capabilities();

    // Ambiguous database layouts refuse to start.
    let db_path = find_database(beads_dir)?;
    let store = SqliteStore::open(&db_path)?;

    // Cross-clone-reuse guard.
    let fingerprint = validate_fingerprint(beads_dir, &store, metadata.as_ref())?;
    info!(%fingerprint, "workspace fingerprint validated");

    let socket = socket_path(beads_dir);
    cleanup_stale_socket(&socket)?;

    std::fs::write(
        beads_dir.join(PID_FILE_NAME),
        std::process::id().to_string(),
    )?;

    Ok(DaemonContext {
        store,
        config,
        beads_dir: beads_dir.to_path_buf(),
        socket_path: socket,
        lock,
    })
}

/// Compares the fingerprint stored in the database against the one in
/// `metadata.json`, minting both on first run.
fn validate_fingerprint(
    beads_dir: &Path,
    store: &SqliteStore,
    metadata: Option<&WorkspaceMetadata>,
) -> Result<String, StartupError> {
    let db_fp = store.get_metadata_impl(meta_keys::FINGERPRINT).ok();

    match (metadata, db_fp) {
        (Some(meta), Some(db_fp)) => {
            if meta.fingerprint != db_fp {
                return Err(StartupError::FingerprintMismatch {
                    expected: meta.fingerprint.clone(),
                    found: db_fp,
                });
            }
            Ok(db_fp)
        }
        (Some(meta), None) => {
            // Database predates fingerprinting: adopt the side file's.
            store.set_metadata_impl(meta_keys::FINGERPRINT, &meta.fingerprint)?;
            Ok(meta.fingerprint.clone())
        }
        (None, Some(db_fp)) => {
            save_metadata(
                beads_dir,
                &WorkspaceMetadata::new(
                    BackendKind::Sqlite.as_str(),
                    &db_fp,
                    CURRENT_SCHEMA_VERSION,
                ),
            )?;
            Ok(db_fp)
        }
        (None, None) => {
            let fp = mint_fingerprint(beads_dir);
            store.set_metadata_impl(meta_keys::FINGERPRINT, &fp)?;
            save_metadata(
                beads_dir,
                &WorkspaceMetadata::new(BackendKind::Sqlite.as_str(), &fp, CURRENT_SCHEMA_VERSION),
            )?;
            Ok(fp)
        }
    }
}

/// Mints a fingerprint from the workspace path plus process-local entropy.
fn mint_fingerprint(beads_dir: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(beads_dir.as_os_str().as_encoded_bytes());
    hasher.update(std::process::id().to_be_bytes());
    hasher.update(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .to_be_bytes(),
    );
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_beads_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();
        (dir, beads)
    }

    #[test]
    fn first_startup_mints_fingerprint_and_pidfile() {
        let (_dir, beads) = fresh_beads_dir();
        let ctx = startup(&beads).unwrap();

        let meta = load_metadata(&beads).unwrap().unwrap();
        assert_eq!(meta.backend, "sqlite");
        assert_eq!(meta.fingerprint.len(), 16);
        assert_eq!(
            ctx.store.get_metadata_impl(meta_keys::FINGERPRINT).unwrap(),
            meta.fingerprint
        );
        assert!(ctx.pid_file().exists());
    }

    #[test]
    fn second_startup_accepts_same_workspace() {
        let (_dir, beads) = fresh_beads_dir();
        let fp1 = {
            let ctx = startup(&beads).unwrap();
            ctx.store.get_metadata_impl(meta_keys::FINGERPRINT).unwrap()
            // lock released on drop
        };
        let ctx = startup(&beads).unwrap();
        let fp2 = ctx.store.get_metadata_impl(meta_keys::FINGERPRINT).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_mismatch_refused() {
        let (_dir, beads) = fresh_beads_dir();
        {
            let _ctx = startup(&beads).unwrap();
        }
        // A metadata.json copied in from another clone.
        save_metadata(
            &beads,
            &WorkspaceMetadata::new("sqlite", "0000000000000000", CURRENT_SCHEMA_VERSION),
        )
        .unwrap();

        let err = startup(&beads).unwrap_err();
        assert!(matches!(err, StartupError::FingerprintMismatch { .. }));
    }

    #[test]
    fn unknown_backend_refused() {
        let (_dir, beads) = fresh_beads_dir();
        save_metadata(
            &beads,
            &WorkspaceMetadata::new("dolt-server", "abc", CURRENT_SCHEMA_VERSION),
        )
        .unwrap();

        let err = startup(&beads).unwrap_err();
        assert!(matches!(err, StartupError::UnknownBackend(_)));
    }

    #[test]
    fn multiple_databases_refused() {
        let (_dir, beads) = fresh_beads_dir();
        std::fs::write(beads.join("a.db"), b"").unwrap();
        std::fs::write(beads.join("b.db"), b"").unwrap();

        let err = startup(&beads).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Storage(StorageError::NotInitialized { .. })
        ));
    }

    #[test]
    fn second_daemon_locked_out() {
        let (_dir, beads) = fresh_beads_dir();
        let _ctx = startup(&beads).unwrap();
        let err = startup(&beads).unwrap_err();
        assert!(matches!(err, StartupError::Lock(_)));
    }
}
