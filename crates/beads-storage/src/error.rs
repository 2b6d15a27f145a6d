//! Storage error taxonomy.
//!
//! Errors are kinds, not strings: callers match on the variant to pick a
//! recovery policy (retry, surface, refresh).

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "issue", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An issue with this ID already exists (tombstones included).
    #[error("issue already exists: {id}")]
    DuplicateId {
        /// The conflicting ID.
        id: String,
    },

    /// A status transition violated the lattice (tombstone is terminal).
    #[error("invalid status transition on {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Adding a dependency would create a cycle over blocking edges.
    #[error("adding this dependency would create a cycle: {issue_id} -> {depends_on_id}")]
    DependencyCycle {
        issue_id: String,
        depends_on_id: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The database is busy or locked by another writer.
    #[error("database busy: {0}")]
    LockBusy(String),

    /// The database has not been initialized.
    #[error("database not initialized: {reason}")]
    NotInitialized { reason: String },

    /// The on-disk schema version is incompatible with this build.
    #[error("schema version {found} is not supported (this build expects {want})")]
    SchemaMismatch { found: i32, want: i32 },

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED surface as LockBusy so callers can retry.
        if let rusqlite::Error::SqliteFailure(err, ref msg) = e {
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::LockBusy(msg.clone().unwrap_or_else(|| err.to_string()));
            }
        }
        Self::Query(e)
    }
}

impl From<beads_core::validation::ValidationError> for StorageError {
    fn from(e: beads_core::validation::ValidationError) -> Self {
        Self::Validation {
            message: e.to_string(),
        }
    }
}

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockBusy(_) | Self::Connection(_) | Self::Transaction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StorageError::LockBusy("x".into()).is_retryable());
        assert!(StorageError::Connection("x".into()).is_retryable());
        assert!(!StorageError::not_found("issue", "bd-a").is_retryable());
        assert!(
            !StorageError::DuplicateId { id: "bd-a".into() }.is_retryable()
        );
    }

    #[test]
    fn busy_maps_to_lock_busy() {
        let sqlite_err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        let err: StorageError = sqlite_err.into();
        assert!(matches!(err, StorageError::LockBusy(_)));
    }

    #[test]
    fn messages_carry_ids() {
        let e = StorageError::InvalidTransition {
            id: "bd-a3f8z".into(),
            from: "tombstone".into(),
            to: "open".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("bd-a3f8z"));
        assert!(msg.contains("tombstone"));
    }
}
