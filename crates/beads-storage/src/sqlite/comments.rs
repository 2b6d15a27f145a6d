//! Comment and event operations for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use beads_core::comment::{Comment, Event};
use beads_core::enums::EventType;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{
    emit_event, format_datetime, get_issue_with_tombstones_on_conn, parse_datetime,
};
use crate::sqlite::store::SqliteStore;

/// Inserts a comment and emits a "commented" event.
pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    get_issue_with_tombstones_on_conn(conn, issue_id)?;
    if text.trim().is_empty() {
        return Err(StorageError::validation("comment text must not be empty"));
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;
    let id = conn.last_insert_rowid();

    emit_event(conn, issue_id, EventType::Commented, author, None, None, &now_str)?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Inserts a comment preserving its original timestamp. Used by the
/// manifest import path; emits no event.
pub(crate) fn import_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Comment> {
    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, format_datetime(&created_at)],
    )?;
    let id = conn.last_insert_rowid();

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at,
    })
}

/// Returns all comments for an issue, oldest first.
pub(crate) fn get_comments_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at
         FROM comments WHERE issue_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(Comment {
            id: row.get("id")?,
            issue_id: row.get("issue_id")?,
            author: row.get("author")?,
            text: row.get("text")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    })?;

    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

impl SqliteStore {
    /// Adds a comment to an issue.
    pub fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        let conn = self.lock_conn()?;
        add_comment_on_conn(&conn, issue_id, author, text)
    }

    /// Returns all comments for an issue.
    pub fn get_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let conn = self.lock_conn()?;
        get_comments_on_conn(&conn, issue_id)
    }

    /// Returns recent events for an issue, newest first.
    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, payload, created_at
             FROM events WHERE issue_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![issue_id, limit], |row| {
            Ok(Event {
                id: row.get("id")?,
                issue_id: row.get("issue_id")?,
                event_type: EventType::from(row.get::<_, String>("event_type")?),
                actor: row.get("actor")?,
                old_value: row.get("old_value")?,
                new_value: row.get("new_value")?,
                payload: row.get("payload")?,
                created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
