//! Issue CRUD operations for [`SqliteStore`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use beads_core::content_hash::compute_content_hash;
use beads_core::enums::{EventType, IssueType, Status};
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;
use beads_core::timefmt;
use beads_core::validation::{validate_issue, validate_transition};

use crate::error::{Result, StorageError};
use crate::sqlite::schema::meta_keys;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria,
    status, priority, issue_type, assignee, owner, created_by,
    created_at, updated_at, closed_at, close_reason,
    deleted_at, deleted_by, delete_reason, original_type,
    ephemeral, pinned, external_ref, source_repo,
    await_type, await_id, source_ref, target_ref,
    semantic_slug, extra
"#;

/// Same as [`ISSUE_COLUMNS`] but prefixed with `issues.` for JOIN queries
/// where column names would otherwise be ambiguous.
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design, issues.acceptance_criteria,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.owner, issues.created_by,
    issues.created_at, issues.updated_at, issues.closed_at, issues.close_reason,
    issues.deleted_at, issues.deleted_by, issues.delete_reason, issues.original_type,
    issues.ephemeral, issues.pinned, issues.external_ref, issues.source_repo,
    issues.await_type, issues.await_id, issues.source_ref, issues.target_ref,
    issues.semantic_slug, issues.extra
"#;

// ---------------------------------------------------------------------------
// Row scanning and timestamp helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as TEXT for SQLite. Full nanosecond precision
/// so that a manifest import round-trips exactly.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    timefmt::format_ts(dt)
}

/// Parses a TEXT timestamp from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    timefmt::parse_ts(s).unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Deserialises a row into an [`Issue`].
///
/// The column order MUST match [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;
    let closed_at_str: Option<String> = row.get("closed_at")?;
    let deleted_at_str: Option<String> = row.get("deleted_at")?;
    let original_type_str: Option<String> = row.get("original_type")?;
    let ephemeral_int: i32 = row.get("ephemeral")?;
    let pinned_int: i32 = row.get("pinned")?;
    let extra_str: String = row.get("extra")?;

    let extra: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&extra_str).unwrap_or_default();

    Ok(Issue {
        id: row.get("id")?,
        content_hash: row.get("content_hash")?,
        title: row.get("title")?,
        description: row.get("description")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        status: Status::from(row.get::<_, String>("status")?),
        priority: row.get("priority")?,
        issue_type: IssueType::from(row.get::<_, String>("issue_type")?),
        assignee: row.get("assignee")?,
        owner: row.get("owner")?,
        created_by: row.get("created_by")?,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
        close_reason: row.get("close_reason")?,
        deleted_at: deleted_at_str.as_deref().map(parse_datetime),
        deleted_by: row.get("deleted_by")?,
        delete_reason: row.get("delete_reason")?,
        original_type: original_type_str.map(IssueType::from),
        ephemeral: ephemeral_int != 0,
        pinned: pinned_int != 0,
        external_ref: row.get("external_ref")?,
        source_repo: row.get("source_repo")?,
        await_type: row.get("await_type")?,
        await_id: row.get("await_id")?,
        source_ref: row.get("source_ref")?,
        target_ref: row.get("target_ref")?,
        semantic_slug: row.get("semantic_slug")?,
        extra,
        // Relational fields are populated on demand by the export path.
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Event and cache helpers
// ---------------------------------------------------------------------------

/// Emits an event row into the events table.
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            created_at,
        ],
    )?;
    Ok(())
}

/// Marks the blocked-issue cache as needing a rebuild.
pub(crate) fn invalidate_blocked_cache(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, '0')",
        params![meta_keys::BLOCKED_CACHE_VALID],
    )?;
    Ok(())
}

/// Reads the registered custom statuses and types from config.
pub(crate) fn registered_customs(conn: &Connection) -> (Vec<String>, Vec<String>) {
    let read = |key: &str| -> Vec<String> {
        conn.query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
    };
    (read("status.custom"), read("types.custom"))
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

/// Inserts a single issue into the database using the provided connection.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM issues WHERE id = ?1",
            params![issue.id],
            |row| row.get::<_, i32>(0),
        )
        .map(|n| n > 0)?;
    if exists {
        return Err(StorageError::DuplicateId {
            id: issue.id.clone(),
        });
    }

    let (custom_statuses, custom_types) = registered_customs(conn);
    validate_issue(issue, &custom_statuses, &custom_types)?;

    let now_str = format_datetime(&Utc::now());
    let content_hash = compute_content_hash(issue);
    let extra_str = serde_json::to_string(&issue.extra)?;

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24,
                ?25, ?26, ?27, ?28,
                ?29, ?30
            )"
        ),
        params![
            issue.id,                                          // 1
            content_hash,                                      // 2
            issue.title,                                       // 3
            issue.description,                                 // 4
            issue.design,                                      // 5
            issue.acceptance_criteria,                         // 6
            issue.status.as_str(),                             // 7
            issue.priority,                                    // 8
            issue.issue_type.as_str(),                         // 9
            issue.assignee,                                    // 10
            issue.owner,                                       // 11
            issue.created_by,                                  // 12
            format_datetime(&issue.created_at),                // 13
            format_datetime(&issue.updated_at),                // 14
            issue.closed_at.as_ref().map(format_datetime),     // 15
            issue.close_reason,                                // 16
            issue.deleted_at.as_ref().map(format_datetime),    // 17
            issue.deleted_by,                                  // 18
            issue.delete_reason,                               // 19
            issue.original_type.as_ref().map(|t| t.as_str().to_string()), // 20
            issue.ephemeral as i32,                            // 21
            issue.pinned as i32,                               // 22
            issue.external_ref,                                // 23
            issue.source_repo,                                 // 24
            issue.await_type,                                  // 25
            issue.await_id,                                    // 26
            issue.source_ref,                                  // 27
            issue.target_ref,                                  // 28
            issue.semantic_slug,                               // 29
            extra_str,                                         // 30
        ],
    )?;

    emit_event(conn, &issue.id, EventType::Created, actor, None, None, &now_str)?;
    invalidate_blocked_cache(conn)?;

    Ok(())
}

/// Rewrites every mutable column of an existing row from the in-memory
/// issue. Shared by update, close, and tombstone paths.
fn update_row(conn: &Connection, issue: &Issue) -> Result<()> {
    let extra_str = serde_json::to_string(&issue.extra)?;
    let affected = conn.execute(
        "UPDATE issues SET
            content_hash = ?2, title = ?3, description = ?4, design = ?5,
            acceptance_criteria = ?6, status = ?7, priority = ?8,
            issue_type = ?9, assignee = ?10, owner = ?11, created_by = ?12,
            created_at = ?13, updated_at = ?14, closed_at = ?15,
            close_reason = ?16, deleted_at = ?17, deleted_by = ?18,
            delete_reason = ?19, original_type = ?20, ephemeral = ?21,
            pinned = ?22, external_ref = ?23, source_repo = ?24,
            await_type = ?25, await_id = ?26, source_ref = ?27,
            target_ref = ?28, semantic_slug = ?29, extra = ?30
         WHERE id = ?1",
        params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.owner,
            issue.created_by,
            format_datetime(&issue.created_at),
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.close_reason,
            issue.deleted_at.as_ref().map(format_datetime),
            issue.deleted_by,
            issue.delete_reason,
            issue.original_type.as_ref().map(|t| t.as_str().to_string()),
            issue.ephemeral as i32,
            issue.pinned as i32,
            issue.external_ref,
            issue.source_repo,
            issue.await_type,
            issue.await_id,
            issue.source_ref,
            issue.target_ref,
            issue.semantic_slug,
            extra_str,
        ],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", &issue.id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Applies the changeset to an in-memory issue, returning the set of field
/// families that changed.
fn apply_updates(issue: &mut Issue, updates: &IssueUpdates) -> Vec<&'static str> {
    let mut families = Vec::new();
    let mut content = false;
    let mut assignment = false;
    let mut lifecycle = false;
    let mut external = false;

    macro_rules! set {
        ($field:ident, $flag:ident) => {
            if let Some(ref v) = updates.$field {
                if issue.$field != *v {
                    issue.$field = v.clone();
                    $flag = true;
                }
            }
        };
    }

    set!(title, content);
    set!(description, content);
    set!(design, content);
    set!(acceptance_criteria, content);
    set!(semantic_slug, content);
    set!(assignee, assignment);
    set!(owner, assignment);
    set!(close_reason, lifecycle);
    set!(source_repo, external);
    set!(await_type, external);
    set!(await_id, external);
    set!(source_ref, external);
    set!(target_ref, external);

    if let Some(p) = updates.priority {
        if issue.priority != p {
            issue.priority = p;
            content = true;
        }
    }
    if let Some(ref t) = updates.issue_type {
        if issue.issue_type != *t {
            issue.issue_type = t.clone();
            content = true;
        }
    }
    if let Some(ref closed_at) = updates.closed_at {
        if issue.closed_at != *closed_at {
            issue.closed_at = *closed_at;
            lifecycle = true;
        }
    }
    if let Some(ref ext) = updates.external_ref {
        if issue.external_ref != *ext {
            issue.external_ref = ext.clone();
            external = true;
        }
    }
    if let Some(e) = updates.ephemeral {
        if issue.ephemeral != e {
            issue.ephemeral = e;
            lifecycle = true;
        }
    }
    if let Some(p) = updates.pinned {
        if issue.pinned != p {
            issue.pinned = p;
            lifecycle = true;
        }
    }

    if content {
        families.push("content");
    }
    if assignment {
        families.push("assignment");
    }
    if lifecycle {
        families.push("lifecycle");
    }
    if external {
        families.push("external");
    }
    families
}

/// Applies partial updates on the given connection.
///
/// Loads the issue, validates the status transition, recomputes the content
/// hash, and emits one "updated" event per changed field family (plus a
/// dedicated "status_changed" event).
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }

    let mut issue = get_issue_with_tombstones_on_conn(conn, id)?;
    let old_status = issue.status.clone();

    if let Some(ref new_status) = updates.status {
        validate_transition(&old_status, new_status).map_err(|_| {
            StorageError::InvalidTransition {
                id: id.to_string(),
                from: old_status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            }
        })?;
    }

    let families = apply_updates(&mut issue, updates);
    let status_changed = updates
        .status
        .as_ref()
        .is_some_and(|s| *s != old_status);
    if status_changed {
        issue.status = updates.status.clone().unwrap();
        // Keep the closed_at invariant: set iff status = closed.
        if issue.status == Status::Closed {
            if issue.closed_at.is_none() {
                issue.closed_at = Some(Utc::now());
            }
        } else if !issue.status.is_tombstone() {
            issue.closed_at = None;
        }
    }

    if families.is_empty() && !status_changed {
        return Ok(());
    }

    let (custom_statuses, custom_types) = registered_customs(conn);
    validate_issue(&issue, &custom_statuses, &custom_types)?;

    let now = Utc::now();
    let now_str = format_datetime(&now);
    issue.updated_at = now;
    issue.content_hash = compute_content_hash(&issue);

    update_row(conn, &issue)?;

    for family in &families {
        emit_event(
            conn,
            id,
            EventType::Updated,
            actor,
            None,
            Some(family),
            &now_str,
        )?;
    }
    if status_changed {
        emit_event(
            conn,
            id,
            EventType::StatusChanged,
            actor,
            Some(old_status.as_str()),
            Some(issue.status.as_str()),
            &now_str,
        )?;
        invalidate_blocked_cache(conn)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Close / tombstone
// ---------------------------------------------------------------------------

/// Closes an issue on the given connection.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let mut issue = get_issue_with_tombstones_on_conn(conn, id)?;
    validate_transition(&issue.status, &Status::Closed).map_err(|_| {
        StorageError::InvalidTransition {
            id: id.to_string(),
            from: issue.status.as_str().to_string(),
            to: "closed".to_string(),
        }
    })?;

    let now = Utc::now();
    issue.status = Status::Closed;
    issue.closed_at = Some(now);
    issue.close_reason = reason.to_string();
    issue.updated_at = now;
    issue.content_hash = compute_content_hash(&issue);

    update_row(conn, &issue)?;

    let now_str = format_datetime(&now);
    emit_event(conn, id, EventType::Closed, actor, None, Some(reason), &now_str)?;
    invalidate_blocked_cache(conn)?;

    Ok(())
}

/// Tombstones an issue on the given connection. Edges are retained so the
/// deletion signal survives merges. Idempotent.
pub(crate) fn tombstone_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let mut issue = get_issue_with_tombstones_on_conn(conn, id)?;
    if issue.is_tombstone() {
        return Ok(());
    }

    let now = Utc::now();
    issue.tombstone(reason, actor, now);
    issue.content_hash = compute_content_hash(&issue);

    update_row(conn, &issue)?;

    // Tombstoning clears the label set; the rows go with it.
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![id])?;

    let now_str = format_datetime(&now);
    emit_event(conn, id, EventType::Tombstoned, actor, None, Some(reason), &now_str)?;
    invalidate_blocked_cache(conn)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Inserts or replaces an issue row exactly as given. Manifest-import only:
/// timestamps and deletion metadata come from the incoming issue, the
/// content hash is recomputed from it, and no events are emitted.
pub(crate) fn import_issue_on_conn(conn: &Connection, issue: &Issue) -> Result<()> {
    let mut incoming = issue.clone();
    incoming.content_hash = compute_content_hash(&incoming);

    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM issues WHERE id = ?1",
            params![incoming.id],
            |row| row.get::<_, i32>(0),
        )
        .map(|n| n > 0)?;

    if exists {
        update_row(conn, &incoming)?;
    } else {
        let extra_str = serde_json::to_string(&incoming.extra)?;
        conn.execute(
            &format!(
                "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6,
                    ?7, ?8, ?9, ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20,
                    ?21, ?22, ?23, ?24,
                    ?25, ?26, ?27, ?28,
                    ?29, ?30
                )"
            ),
            params![
                incoming.id,
                incoming.content_hash,
                incoming.title,
                incoming.description,
                incoming.design,
                incoming.acceptance_criteria,
                incoming.status.as_str(),
                incoming.priority,
                incoming.issue_type.as_str(),
                incoming.assignee,
                incoming.owner,
                incoming.created_by,
                format_datetime(&incoming.created_at),
                format_datetime(&incoming.updated_at),
                incoming.closed_at.as_ref().map(format_datetime),
                incoming.close_reason,
                incoming.deleted_at.as_ref().map(format_datetime),
                incoming.deleted_by,
                incoming.delete_reason,
                incoming.original_type.as_ref().map(|t| t.as_str().to_string()),
                incoming.ephemeral as i32,
                incoming.pinned as i32,
                incoming.external_ref,
                incoming.source_repo,
                incoming.await_type,
                incoming.await_id,
                incoming.source_ref,
                incoming.target_ref,
                incoming.semantic_slug,
                extra_str,
            ],
        )?;
    }

    invalidate_blocked_cache(conn)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Get / search
// ---------------------------------------------------------------------------

/// Retrieves a single issue by ID on the given connection, tombstones
/// included.
pub(crate) fn get_issue_with_tombstones_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => other.into(),
        })
}

/// Retrieves a single issue by ID, excluding tombstones.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let issue = get_issue_with_tombstones_on_conn(conn, id)?;
    if issue.is_tombstone() {
        return Err(StorageError::not_found("issue", id));
    }
    Ok(issue)
}

/// Searches issues on the given connection.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    // Full-text search across title, description, and id.
    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR id LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if !filter.include_tombstones {
        where_clauses.push("status != 'tombstone'".to_string());
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(min) = filter.priority_min {
        where_clauses.push(format!("priority >= ?{param_idx}"));
        param_values.push(Box::new(min));
        param_idx += 1;
    }
    if let Some(max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{param_idx}"));
        param_values.push(Box::new(max));
        param_idx += 1;
    }
    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(j, _)| format!("?{}", param_idx + j))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }
    if let Some(ref id_prefix) = filter.id_prefix {
        where_clauses.push(format!("id LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("{id_prefix}%")));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref desc_contains) = filter.description_contains {
        where_clauses.push(format!("description LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{desc_contains}%")));
        param_idx += 1;
    }

    // Date ranges.
    for (value, clause) in [
        (&filter.created_after, "created_at >="),
        (&filter.created_before, "created_at <="),
        (&filter.updated_after, "updated_at >="),
        (&filter.updated_before, "updated_at <="),
        (&filter.closed_after, "closed_at >="),
        (&filter.closed_before, "closed_at <="),
    ] {
        if let Some(dt) = value {
            where_clauses.push(format!("{clause} ?{param_idx}"));
            param_values.push(Box::new(format_datetime(dt)));
            param_idx += 1;
        }
    }

    // Empty/null predicates.
    if filter.no_assignee {
        where_clauses.push("assignee = ''".to_string());
    }
    if filter.empty_description {
        where_clauses.push("description = ''".to_string());
    }
    if filter.no_labels {
        where_clauses.push(
            "NOT EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id)".to_string(),
        );
    }

    if let Some(ephemeral) = filter.ephemeral {
        where_clauses.push(format!("ephemeral = ?{param_idx}"));
        param_values.push(Box::new(ephemeral as i32));
        param_idx += 1;
    }
    if let Some(pinned) = filter.pinned {
        where_clauses.push(format!("pinned = ?{param_idx}"));
        param_values.push(Box::new(pinned as i32));
        param_idx += 1;
    }
    if let Some(ref repo) = filter.source_repo {
        where_clauses.push(format!("source_repo = ?{param_idx}"));
        param_values.push(Box::new(repo.clone()));
        param_idx += 1;
    }

    // Label filters (AND).
    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        param_idx += 1;
    }

    // Label filters (OR).
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(j, _)| format!("?{}", param_idx + j))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    let where_sql = if where_clauses.is_empty() {
        "1=1".to_string()
    } else {
        where_clauses.join(" AND ")
    };

    // Deterministic ordering when a sort key is supplied; id tiebreak always.
    let order_sql = match filter.sort {
        Some(key) => format!("{} ASC, id ASC", key.column()),
        None => "id ASC".to_string(),
    };

    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE {where_sql} ORDER BY {order_sql}{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;
    Ok(issues)
}

// ---------------------------------------------------------------------------
// SqliteStore issue methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Creates a single issue.
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    /// Creates multiple issues in a single transaction.
    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        for issue in issues {
            insert_issue(&tx, issue, actor)?;
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Retrieves an issue by ID, excluding tombstones.
    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    /// Retrieves an issue by ID, tombstones included.
    pub fn get_issue_with_tombstones_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_with_tombstones_on_conn(&conn, id)
    }

    /// Retrieves an issue by external reference.
    pub fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?1");
        conn.query_row(&sql, params![external_ref], scan_issue)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::not_found("issue", format!("external_ref={external_ref}"))
                }
                other => other.into(),
            })
    }

    /// Applies partial updates to an issue.
    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor)
    }

    /// Closes an issue.
    pub fn close_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor)
    }

    /// Tombstones an issue.
    pub fn tombstone_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        tombstone_issue_on_conn(&conn, id, reason, actor)
    }

    /// Searches issues by text query and filter.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::{IssueBuilder, TOMBSTONE_TITLE};

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get() {
        let store = test_store();
        let issue = IssueBuilder::new("First").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let got = store.get_issue_impl("bd-aaa11").unwrap();
        assert_eq!(got.title, "First");
        assert!(!got.content_hash.is_empty());
    }

    #[test]
    fn duplicate_id_rejected() {
        let store = test_store();
        let issue = IssueBuilder::new("First").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let err = store.create_issue_impl(&issue, "alice").unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }

    #[test]
    fn duplicate_check_includes_tombstones() {
        let store = test_store();
        let issue = IssueBuilder::new("First").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.tombstone_issue_impl("bd-aaa11", "gone", "alice").unwrap();

        let err = store.create_issue_impl(&issue, "alice").unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }

    #[test]
    fn content_hash_recomputed_on_update() {
        let store = test_store();
        let issue = IssueBuilder::new("Before").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        let before = store.get_issue_impl("bd-aaa11").unwrap().content_hash;

        let updates = IssueUpdates {
            title: Some("After".into()),
            ..Default::default()
        };
        store.update_issue_impl("bd-aaa11", &updates, "alice").unwrap();

        let after = store.get_issue_impl("bd-aaa11").unwrap();
        assert_ne!(after.content_hash, before);
        assert_eq!(after.content_hash, compute_content_hash(&after));
    }

    #[test]
    fn update_rejects_resurrection() {
        let store = test_store();
        let issue = IssueBuilder::new("Doomed").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.tombstone_issue_impl("bd-aaa11", "obsolete", "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Open),
            ..Default::default()
        };
        let err = store.update_issue_impl("bd-aaa11", &updates, "bob").unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
    }

    #[test]
    fn closed_at_iff_closed() {
        let store = test_store();
        let issue = IssueBuilder::new("Work").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.close_issue_impl("bd-aaa11", "done", "alice").unwrap();

        let closed = store.get_issue_impl("bd-aaa11").unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.close_reason, "done");

        // Reopen: closed_at clears.
        let updates = IssueUpdates {
            status: Some(Status::Open),
            ..Default::default()
        };
        store.update_issue_impl("bd-aaa11", &updates, "alice").unwrap();
        let reopened = store.get_issue_impl("bd-aaa11").unwrap();
        assert!(reopened.closed_at.is_none());
    }

    #[test]
    fn tombstone_hides_from_get_but_not_with_flag() {
        let store = test_store();
        let issue = IssueBuilder::new("Hidden").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.tombstone_issue_impl("bd-aaa11", "cleanup", "alice").unwrap();

        assert!(store.get_issue_impl("bd-aaa11").unwrap_err().is_not_found());

        let t = store.get_issue_with_tombstones_impl("bd-aaa11").unwrap();
        assert!(t.is_tombstone());
        assert_eq!(t.title, TOMBSTONE_TITLE);
        assert_eq!(t.deleted_by, "alice");
        assert_eq!(t.delete_reason, "cleanup");
        assert_eq!(t.deleted_at, Some(t.updated_at));
    }

    #[test]
    fn tombstone_twice_is_noop() {
        let store = test_store();
        let issue = IssueBuilder::new("Once").id("bd-aaa11").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.tombstone_issue_impl("bd-aaa11", "first", "alice").unwrap();
        let first = store.get_issue_with_tombstones_impl("bd-aaa11").unwrap();

        store.tombstone_issue_impl("bd-aaa11", "second", "bob").unwrap();
        let second = store.get_issue_with_tombstones_impl("bd-aaa11").unwrap();
        assert_eq!(first.delete_reason, second.delete_reason);
        assert_eq!(first.deleted_by, second.deleted_by);
        assert_eq!(first.deleted_at, second.deleted_at);
    }

    #[test]
    fn search_excludes_tombstones_by_default() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("Alive").id("bd-aaa11").build(), "a")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("Dead").id("bd-bbb22").build(), "a")
            .unwrap();
        store.tombstone_issue_impl("bd-bbb22", "x", "a").unwrap();

        let found = store.search_issues_impl("", &IssueFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bd-aaa11");

        let all = store
            .search_issues_impl("", &IssueFilter::everything())
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn search_structured_filters() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("P0 urgent").id("bd-aaa11").priority(0).build(),
                "a",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("P4 someday").id("bd-bbb22").priority(4).build(),
                "a",
            )
            .unwrap();

        let filter = IssueFilter {
            priority_max: Some(1),
            ..Default::default()
        };
        let found = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bd-aaa11");

        let found = store.search_issues_impl("someday", &IssueFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bd-bbb22");
    }

    #[test]
    fn search_deterministic_order_with_sort_key() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("B").id("bd-bbb22").priority(1).build(),
                "a",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("A").id("bd-aaa11").priority(1).build(),
                "a",
            )
            .unwrap();

        let filter = IssueFilter {
            sort: Some(beads_core::filter::SortKey::Priority),
            ..Default::default()
        };
        let found = store.search_issues_impl("", &filter).unwrap();
        let ids: Vec<&str> = found.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-aaa11", "bd-bbb22"]);
    }

    #[test]
    fn oversize_description_rejected() {
        let store = test_store();
        let issue = IssueBuilder::new("big")
            .id("bd-aaa11")
            .description("x".repeat(beads_core::validation::MAX_BODY_BYTES + 1))
            .build();
        let err = store.create_issue_impl(&issue, "a").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }
}
