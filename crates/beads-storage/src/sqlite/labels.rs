//! Label operations for [`SqliteStore`].

use chrono::Utc;
use rusqlite::{Connection, params};

use beads_core::enums::EventType;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{emit_event, format_datetime, get_issue_with_tombstones_on_conn};
use crate::sqlite::store::SqliteStore;

/// Adds a label on the given connection. Adding an existing label is a
/// no-op that emits no event.
pub(crate) fn add_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let issue = get_issue_with_tombstones_on_conn(conn, issue_id)?;
    if issue.is_tombstone() {
        return Err(StorageError::validation(format!(
            "cannot label tombstoned issue {issue_id}"
        )));
    }
    if label.trim().is_empty() {
        return Err(StorageError::validation("label must not be empty"));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
        params![issue_id, label],
    )?;
    if inserted > 0 {
        let now_str = format_datetime(&Utc::now());
        emit_event(
            conn,
            issue_id,
            EventType::LabelAdded,
            actor,
            None,
            Some(label),
            &now_str,
        )?;
    }
    Ok(())
}

/// Removes a label on the given connection.
pub(crate) fn remove_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
        params![issue_id, label],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found(
            "label",
            format!("{issue_id}:{label}"),
        ));
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        issue_id,
        EventType::LabelRemoved,
        actor,
        Some(label),
        None,
        &now_str,
    )?;
    Ok(())
}

/// Replaces the full label set of an issue. Manifest-import only: no
/// events, no tombstone check.
pub(crate) fn replace_labels_on_conn(
    conn: &Connection,
    issue_id: &str,
    labels: &[String],
) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![issue_id])?;
    for label in labels {
        conn.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
            params![issue_id, label],
        )?;
    }
    Ok(())
}

/// Returns all labels for an issue, sorted.
pub(crate) fn get_labels_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![issue_id], |row| row.get::<_, String>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

impl SqliteStore {
    /// Adds a label to an issue.
    pub fn add_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Removes a label from an issue.
    pub fn remove_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_label_on_conn(&conn, issue_id, label, actor)
    }

    /// Returns all labels for an issue.
    pub fn get_labels_impl(&self, issue_id: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_labels_on_conn(&conn, issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn add_remove_labels() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("L").id("bd-l1111").build(), "a")
            .unwrap();

        store.add_label_impl("bd-l1111", "backend", "a").unwrap();
        store.add_label_impl("bd-l1111", "auth", "a").unwrap();
        assert_eq!(
            store.get_labels_impl("bd-l1111").unwrap(),
            vec!["auth", "backend"]
        );

        store.remove_label_impl("bd-l1111", "auth", "a").unwrap();
        assert_eq!(store.get_labels_impl("bd-l1111").unwrap(), vec!["backend"]);
    }

    #[test]
    fn duplicate_label_is_noop() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("L").id("bd-l1111").build(), "a")
            .unwrap();
        store.add_label_impl("bd-l1111", "x", "a").unwrap();
        store.add_label_impl("bd-l1111", "x", "a").unwrap();
        assert_eq!(store.get_labels_impl("bd-l1111").unwrap().len(), 1);
    }

    #[test]
    fn labeling_tombstone_rejected() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("L").id("bd-l1111").build(), "a")
            .unwrap();
        store.tombstone_issue_impl("bd-l1111", "x", "a").unwrap();

        let err = store.add_label_impl("bd-l1111", "late", "a").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[test]
    fn remove_missing_label_not_found() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("L").id("bd-l1111").build(), "a")
            .unwrap();
        let err = store.remove_label_impl("bd-l1111", "nope", "a").unwrap_err();
        assert!(err.is_not_found());
    }
}
