//! Bulk purge: the only path that hard-deletes rows.
//!
//! Purge targets rows with `ephemeral = 1` whose status is closed or
//! tombstone; pinned rows are always spared. Labels, comments, and events go
//! via foreign-key cascade; dependency edges that reference a victim on
//! either side are removed explicitly.

use chrono::{Duration, Utc};
use rusqlite::params;
use tracing::info;

use beads_core::filter::PurgeFilter;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::format_datetime;
use crate::sqlite::store::SqliteStore;

impl SqliteStore {
    /// Hard-deletes matching ephemeral rows and everything that references
    /// them. Returns the purged IDs, sorted.
    pub fn purge_impl(&self, filter: &PurgeFilter) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let mut where_clauses: Vec<String> = vec![
            "ephemeral = 1".to_string(),
            "pinned = 0".to_string(),
            "status IN ('closed', 'tombstone')".to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref glob) = filter.id_glob {
            where_clauses.push(format!("id GLOB ?{param_idx}"));
            param_values.push(Box::new(glob.clone()));
            param_idx += 1;
        }
        if let Some(days) = filter.older_than_days {
            let cutoff = Utc::now() - Duration::days(days);
            where_clauses.push(format!("updated_at <= ?{param_idx}"));
            param_values.push(Box::new(format_datetime(&cutoff)));
            param_idx += 1;
        }
        if let Some(ref pattern) = filter.title_pattern {
            where_clauses.push(format!("title LIKE ?{param_idx}"));
            param_values.push(Box::new(format!("%{pattern}%")));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let victims: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM issues WHERE {where_sql} ORDER BY id"
            ))?;
            stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?
        };

        if victims.is_empty() {
            return Ok(victims);
        }

        for id in &victims {
            // Edges referencing the victim on either side.
            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
                params![id],
            )?;
            // Labels, comments, and events cascade from the issue row.
            tx.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;

        info!(count = victims.len(), "purged ephemeral issues");
        let _ = param_idx;
        Ok(victims)
    }

    /// Garbage-collects tombstones older than the retention window.
    ///
    /// A tombstone is expired once `deleted_at` is older than
    /// `retention_days` AND no dependency edge references it from another
    /// issue (links must keep carrying the deletion signal). Pinned rows
    /// are spared. Returns the removed IDs, sorted.
    pub fn expire_tombstones_impl(&self, retention_days: i64) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let cutoff = Utc::now() - Duration::days(retention_days);
        let victims: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM issues
                 WHERE status = 'tombstone'
                   AND pinned = 0
                   AND deleted_at IS NOT NULL
                   AND deleted_at <= ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM dependencies d
                       WHERE d.depends_on_id = issues.id AND d.issue_id != issues.id
                   )
                 ORDER BY id",
            )?;
            stmt.query_map(params![format_datetime(&cutoff)], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<_>>()?
        };

        for id in &victims {
            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;

        if !victims.is_empty() {
            info!(count = victims.len(), "expired tombstones past retention");
        }
        Ok(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::dependency::Dependency;
    use beads_core::enums::DependencyType;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn closed_ephemeral(store: &SqliteStore, id: &str, pinned: bool) {
        let issue = IssueBuilder::new(format!("tmp {id}"))
            .id(id)
            .ephemeral(true)
            .pinned(pinned)
            .build();
        store.create_issue_impl(&issue, "a").unwrap();
        store.close_issue_impl(id, "done", "a").unwrap();
    }

    #[test]
    fn purge_spares_pinned_and_non_ephemeral() {
        let store = test_store();

        for i in 0..10 {
            closed_ephemeral(&store, &format!("bd-w{i}{i}{i}{i}"), false);
        }
        closed_ephemeral(&store, "bd-pin11", true);

        let durable = IssueBuilder::new("keep me").id("bd-keep1").build();
        store.create_issue_impl(&durable, "a").unwrap();
        store.close_issue_impl("bd-keep1", "done", "a").unwrap();

        let purged = store.purge_impl(&PurgeFilter::default()).unwrap();
        assert_eq!(purged.len(), 10);
        assert!(!purged.contains(&"bd-pin11".to_string()));
        assert!(!purged.contains(&"bd-keep1".to_string()));

        assert!(store.get_issue_with_tombstones_impl("bd-pin11").is_ok());
        assert!(store.get_issue_with_tombstones_impl("bd-keep1").is_ok());
        assert!(store
            .get_issue_with_tombstones_impl("bd-w0000")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn purge_skips_open_ephemerals() {
        let store = test_store();
        let open = IssueBuilder::new("live wisp").id("bd-live1").ephemeral(true).build();
        store.create_issue_impl(&open, "a").unwrap();

        let purged = store.purge_impl(&PurgeFilter::default()).unwrap();
        assert!(purged.is_empty());
    }

    #[test]
    fn purge_removes_tombstones_that_match() {
        let store = test_store();
        let issue = IssueBuilder::new("ghost").id("bd-gh111").ephemeral(true).build();
        store.create_issue_impl(&issue, "a").unwrap();
        store.tombstone_issue_impl("bd-gh111", "x", "a").unwrap();

        let purged = store.purge_impl(&PurgeFilter::default()).unwrap();
        assert_eq!(purged, vec!["bd-gh111"]);
    }

    #[test]
    fn purge_removes_referencing_edges() {
        let store = test_store();
        closed_ephemeral(&store, "bd-vic11", false);
        let other = IssueBuilder::new("other").id("bd-oth11").build();
        store.create_issue_impl(&other, "a").unwrap();
        store
            .add_dependency_impl(
                &Dependency::new("bd-oth11", "bd-vic11", DependencyType::Related),
                "a",
            )
            .unwrap();

        store.purge_impl(&PurgeFilter::default()).unwrap();

        let deps = store.get_dependency_records_impl("bd-oth11").unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn expired_tombstones_swept_unless_referenced() {
        let store = test_store();
        for id in ["bd-old11", "bd-ref11", "bd-new11"] {
            store
                .create_issue_impl(&IssueBuilder::new(format!("t {id}")).id(id).build(), "a")
                .unwrap();
        }
        store
            .create_issue_impl(&IssueBuilder::new("liv").id("bd-liv11").build(), "a")
            .unwrap();
        // bd-liv11 still points at bd-ref11.
        store
            .add_dependency_impl(
                &Dependency::new("bd-liv11", "bd-ref11", DependencyType::Related),
                "a",
            )
            .unwrap();

        for id in ["bd-old11", "bd-ref11", "bd-new11"] {
            store.tombstone_issue_impl(id, "swept", "a").unwrap();
        }
        // Age two of them past the window.
        {
            let conn = store.read_conn().unwrap();
            conn.execute(
                "UPDATE issues SET deleted_at = '2020-01-01T00:00:00.000000000Z'
                 WHERE id IN ('bd-old11', 'bd-ref11')",
                [],
            )
            .unwrap();
        }

        let expired = store.expire_tombstones_impl(90).unwrap();
        // bd-old11 is old and unreferenced: gone. bd-ref11 is old but still
        // referenced: kept. bd-new11 is within the window: kept.
        assert_eq!(expired, vec!["bd-old11"]);
        assert!(store.get_issue_with_tombstones_impl("bd-ref11").is_ok());
        assert!(store.get_issue_with_tombstones_impl("bd-new11").is_ok());
    }

    #[test]
    fn purge_glob_filter() {
        let store = test_store();
        closed_ephemeral(&store, "bd-msg11", false);
        closed_ephemeral(&store, "bd-tsk11", false);

        let filter = PurgeFilter {
            id_glob: Some("bd-msg*".into()),
            ..Default::default()
        };
        let purged = store.purge_impl(&filter).unwrap();
        assert_eq!(purged, vec!["bd-msg11"]);
        assert!(store.get_issue_with_tombstones_impl("bd-tsk11").is_ok());
    }
}
