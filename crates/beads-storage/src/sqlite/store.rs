//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// Upper bound on lock-acquisition retries before surfacing `LockBusy`.
const LOCK_RETRY_DEADLINE: Duration = Duration::from_secs(5);

/// Initial backoff between lock retries. Doubles per attempt.
const LOCK_RETRY_BASE: Duration = Duration::from_millis(10);

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage)
/// trait.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`: a single writer at a time
/// inside the process, serialized access for everyone else.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode and foreign keys, then initialises the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Sets connection pragmas (WAL mode, foreign keys, busy timeout).
    fn configure_connection(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;
        Ok(())
    }

    /// Creates all tables and indexes if they do not exist, then runs
    /// migrations. A database written by a newer build is refused.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        let version: std::result::Result<i32, _> = conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [schema::meta_keys::SCHEMA_VERSION],
            |row| {
                let v: String = row.get(0)?;
                Ok(v.parse::<i32>().unwrap_or(0))
            },
        );
        if let Ok(v) = version {
            if v > schema::CURRENT_SCHEMA_VERSION {
                // Forward-only migrations: refuse a downgrade.
                return Err(StorageError::SchemaMismatch {
                    found: v,
                    want: schema::CURRENT_SCHEMA_VERSION,
                });
            }
            if v == schema::CURRENT_SCHEMA_VERSION {
                debug!(version = v, "schema already at current version");
                return Ok(());
            }
        }

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).map_err(|e| StorageError::Internal(
                format!("schema init failed: {e}\nStatement: {}", truncate(stmt, 120)),
            ))?;
        }

        // Insert default config (INSERT OR IGNORE to stay idempotent).
        for &(key, value) in schema::DEFAULT_CONFIG {
            conn.execute(
                "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
        }

        Self::run_migrations_on_conn(&conn)?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            rusqlite::params![
                schema::meta_keys::SCHEMA_VERSION,
                schema::CURRENT_SCHEMA_VERSION.to_string()
            ],
        )?;

        info!(
            version = schema::CURRENT_SCHEMA_VERSION,
            "schema initialized"
        );
        Ok(())
    }

    /// Applies pending migrations tracked via the `metadata` table.
    fn run_migrations_on_conn(conn: &Connection) -> Result<()> {
        for &(name, sql) in schema::MIGRATIONS {
            let key = format!("migration:{name}");
            let already_applied: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM metadata WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get::<_, i32>(0),
                )
                .unwrap_or(0)
                > 0;

            if already_applied {
                debug!(name, "migration already applied, skipping");
                continue;
            }

            debug!(name, "applying migration");
            conn.execute_batch(sql).map_err(|e| StorageError::Internal(
                format!("migration {name} failed: {e}"),
            ))?;

            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, "applied"],
            )?;
        }
        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }

    /// Escape hatch for bulk reads (the purge path uses this).
    pub fn read_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.lock_conn()
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Runs `f`, retrying transient failures with exponential backoff until the
/// deadline. Contention surfaces as `LockBusy` once the deadline passes.
pub fn with_retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let mut delay = LOCK_RETRY_BASE;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && start.elapsed() < LOCK_RETRY_DEADLINE => {
                warn!(error = %e, ?delay, "transient storage error, retrying");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0, "default config should be inserted");
    }

    #[test]
    fn schema_version_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION.to_string());
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn newer_schema_refused() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.lock_conn().unwrap();
            conn.execute(
                "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                rusqlite::params![(schema::CURRENT_SCHEMA_VERSION + 1).to_string()],
            )
            .unwrap();
        }
        let err = store.init_schema().unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    }

    #[test]
    fn with_retry_gives_up_on_user_error() {
        let mut calls = 0;
        let result: Result<()> = with_retry(|| {
            calls += 1;
            Err(StorageError::not_found("issue", "bd-x"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
