//! Config and metadata operations for [`SqliteStore`].
//!
//! Config is user-visible key/value in a flat namespace. The `deploy.`
//! namespace is read-only through this API. Metadata is engine-internal
//! (schema version, fingerprint, sync bookkeeping).

use std::collections::HashMap;

use rusqlite::{Connection, params};

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;

/// Prefix of read-only config keys.
const READONLY_NAMESPACE: &str = "deploy.";

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(StorageError::validation("config key must not be empty"));
    }
    if key.starts_with(READONLY_NAMESPACE) {
        return Err(StorageError::validation(format!(
            "config key '{key}' is read-only (deploy namespace)"
        )));
    }
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("config", key),
        other => other.into(),
    })
}

pub(crate) fn delete_config_on_conn(conn: &Connection, key: &str) -> Result<()> {
    if key.starts_with(READONLY_NAMESPACE) {
        return Err(StorageError::validation(format!(
            "config key '{key}' is read-only (deploy namespace)"
        )));
    }
    let affected = conn.execute("DELETE FROM config WHERE key = ?1", params![key])?;
    if affected == 0 {
        return Err(StorageError::not_found("config", key));
    }
    Ok(())
}

pub(crate) fn set_metadata_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_metadata_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("metadata", key),
        other => other.into(),
    })
}

impl SqliteStore {
    /// Sets a config key. The `deploy.` namespace is rejected.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_config_on_conn(&conn, key, value)
    }

    /// Gets a config value.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_config_on_conn(&conn, key)
    }

    /// Deletes a config key.
    pub fn delete_config_impl(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_config_on_conn(&conn, key)
    }

    /// Returns all config key-value pairs.
    pub fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Sets an engine-internal metadata key.
    pub fn set_metadata_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_metadata_on_conn(&conn, key, value)
    }

    /// Gets an engine-internal metadata key.
    pub fn get_metadata_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_metadata_on_conn(&conn, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn set_get_delete_config() {
        let store = test_store();
        store.set_config_impl("sync.branch", "beads-sync").unwrap();
        assert_eq!(store.get_config_impl("sync.branch").unwrap(), "beads-sync");

        store.delete_config_impl("sync.branch").unwrap();
        assert!(store.get_config_impl("sync.branch").unwrap_err().is_not_found());
    }

    #[test]
    fn deploy_namespace_is_readonly() {
        let store = test_store();
        let err = store.set_config_impl("deploy.region", "eu").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
        let err = store.delete_config_impl("deploy.region").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[test]
    fn defaults_present_in_get_all() {
        let store = test_store();
        let all = store.get_all_config_impl().unwrap();
        assert!(all.contains_key("sync.debounce_seconds"));
        assert_eq!(all["sync.debounce_seconds"], "5");
    }

    #[test]
    fn metadata_roundtrip() {
        let store = test_store();
        store.set_metadata_impl("last_export_hash", "abc123").unwrap();
        assert_eq!(store.get_metadata_impl("last_export_hash").unwrap(), "abc123");
    }
}
