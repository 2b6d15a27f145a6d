//! Dependency CRUD, cycle detection, and cascading delete for
//! [`SqliteStore`].

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, params};

use beads_core::dependency::Dependency;
use beads_core::enums::{DependencyType, EventType};
use beads_core::validation::MAX_CHILD_DEPTH;
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{
    ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, get_issue_with_tombstones_on_conn,
    invalidate_blocked_cache, scan_issue, tombstone_issue_on_conn,
};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts a dependency on the given connection.
///
/// Both endpoints must exist (tombstones count: links survive deletion).
/// Blocking edge types are checked for cycles; parent-child additionally
/// enforces the single-parent rule and the depth bound.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    // Both endpoints must exist.
    get_issue_with_tombstones_on_conn(conn, &dep.issue_id)?;
    get_issue_with_tombstones_on_conn(conn, &dep.depends_on_id)?;

    if dep.issue_id == dep.depends_on_id {
        return Err(StorageError::validation("an issue cannot depend on itself"));
    }

    if dep.dep_type == DependencyType::ParentChild {
        check_parent_rules(conn, &dep.issue_id, &dep.depends_on_id)?;
    }

    // Cycle detection for blocking dependency types. Rejection leaves no row.
    if dep.dep_type.is_blocking() {
        detect_cycle(conn, &dep.issue_id, &dep.depends_on_id)?;
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT OR REPLACE INTO dependencies
         (issue_id, depends_on_id, type, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            format_datetime(&dep.created_at),
            dep.created_by,
        ],
    )?;

    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        &now_str,
    )?;
    invalidate_blocked_cache(conn)?;

    Ok(())
}

/// Removes a dependency on the given connection.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        &now_str,
    )?;
    invalidate_blocked_cache(conn)?;

    Ok(())
}

/// Returns raw dependency records for an issue on the given connection.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by
         FROM dependencies WHERE issue_id = ?1
         ORDER BY depends_on_id",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

/// Replaces the full outbound dependency set of an issue. Manifest-import
/// only: the merged manifest is authoritative, so no events and no cycle
/// re-check.
pub(crate) fn replace_dependencies_on_conn(
    conn: &Connection,
    issue_id: &str,
    deps: &[Dependency],
) -> Result<()> {
    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1",
        params![issue_id],
    )?;
    for dep in deps {
        conn.execute(
            "INSERT OR REPLACE INTO dependencies
             (issue_id, depends_on_id, type, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                format_datetime(&dep.created_at),
                dep.created_by,
            ],
        )?;
    }
    invalidate_blocked_cache(conn)?;
    Ok(())
}

fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let type_str: String = row.get("type")?;
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        dep_type: DependencyType::parse(&type_str).unwrap_or_default(),
        created_at: crate::sqlite::issues::parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
    })
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Detects whether adding the edge `issue_id -> depends_on_id` would create
/// a cycle over blocking edge types.
///
/// DFS from `depends_on_id` along outgoing blocking edges; any path back to
/// `issue_id` is a cycle. The visit count is capped at the total issue count
/// to bound pathological runtimes.
fn detect_cycle(conn: &Connection, issue_id: &str, depends_on_id: &str) -> Result<()> {
    let issue_count: usize = conn
        .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get::<_, i64>(0))
        .map(|n| n as usize)?;

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = vec![depends_on_id.to_string()];

    while let Some(current) = stack.pop() {
        if current == issue_id {
            return Err(StorageError::DependencyCycle {
                issue_id: issue_id.to_string(),
                depends_on_id: depends_on_id.to_string(),
            });
        }
        if !visited.insert(current.clone()) || visited.len() > issue_count {
            continue;
        }
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type IN ({})",
            DependencyType::BLOCKING_SQL_LIST
        ))?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                stack.push(next);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Parent-child rules
// ---------------------------------------------------------------------------

/// Parent-child edges must form a forest: one parent per issue, bounded
/// depth. The child is `issue_id`, the parent `depends_on_id`.
fn check_parent_rules(conn: &Connection, issue_id: &str, depends_on_id: &str) -> Result<()> {
    let existing_parent: Option<String> = conn
        .query_row(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type = 'parent-child'",
            params![issue_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    if let Some(parent) = existing_parent {
        if parent != depends_on_id {
            return Err(StorageError::validation(format!(
                "{issue_id} already has parent {parent}"
            )));
        }
    }

    // Walk the ancestor chain from the new parent; the child sits one level
    // below the parent's depth.
    let mut depth = 1usize;
    let mut current = depends_on_id.to_string();
    loop {
        let parent: Option<String> = conn
            .query_row(
                "SELECT depends_on_id FROM dependencies
                 WHERE issue_id = ?1 AND type = 'parent-child'",
                params![current],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match parent {
            Some(p) => {
                depth += 1;
                if depth >= MAX_CHILD_DEPTH {
                    return Err(StorageError::validation(format!(
                        "parent-child depth limit of {MAX_CHILD_DEPTH} exceeded"
                    )));
                }
                current = p;
            }
            None => break,
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Cascading delete
// ---------------------------------------------------------------------------

/// Tombstones `id` and every descendant reachable via parent-child edges.
/// Dependents over other edge types are not cascaded; they receive a
/// notification event instead. Returns the tombstoned IDs, root first.
pub(crate) fn cascade_tombstone_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<Vec<String>> {
    // Collect the parent-child subtree (children point at their parent).
    let mut order: Vec<String> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<String> = vec![id.to_string()];

    while let Some(current) = queue.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        order.push(current.clone());

        let mut stmt = conn.prepare_cached(
            "SELECT issue_id FROM dependencies
             WHERE depends_on_id = ?1 AND type = 'parent-child'",
        )?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let child = row?;
            if !visited.contains(&child) {
                queue.push(child);
            }
        }
    }

    let now_str = format_datetime(&Utc::now());
    for victim in &order {
        tombstone_issue_on_conn(conn, victim, reason, actor)?;

        // Notify non-parent-child dependents; their edges stay.
        let mut stmt = conn.prepare_cached(
            "SELECT issue_id FROM dependencies
             WHERE depends_on_id = ?1 AND type != 'parent-child'",
        )?;
        let dependents: Vec<String> = stmt
            .query_map(params![victim], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        for dependent in dependents {
            emit_event(
                conn,
                &dependent,
                EventType::Other("dependency_tombstoned".into()),
                actor,
                Some(victim),
                None,
                &now_str,
            )?;
        }
    }

    Ok(order)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a dependency edge.
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor)
    }

    /// Removes a dependency edge.
    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor)
    }

    /// Returns raw dependency records for an issue.
    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    /// Returns issues that the given issue depends on.
    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1
             ORDER BY issues.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns issues that depend on the given issue.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1
             ORDER BY issues.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Tombstones an issue and its parent-child descendants.
    pub fn cascade_tombstone_impl(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        let order = cascade_tombstone_on_conn(&tx, id, reason, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(order)
    }
}
