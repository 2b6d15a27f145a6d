//! Work queries: ready work, blocked issues, statistics.

use rusqlite::{Connection, params};

use beads_core::enums::{DependencyType, SortPolicy};
use beads_core::filter::WorkFilter;
use beads_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::issues::{ISSUE_COLUMNS, scan_issue};
use crate::sqlite::schema::meta_keys;
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, Statistics};

// ---------------------------------------------------------------------------
// Blocked-issue cache
// ---------------------------------------------------------------------------

/// Rebuilds the blocked-issue cache if it has been invalidated by a status
/// or edge mutation since the last rebuild.
fn ensure_blocked_cache(conn: &Connection) -> Result<()> {
    let valid: bool = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![meta_keys::BLOCKED_CACHE_VALID],
            |row| row.get::<_, String>(0),
        )
        .map(|v| v == "1")
        .unwrap_or(false);
    if valid {
        return Ok(());
    }

    conn.execute("DELETE FROM blocked_cache", [])?;
    conn.execute(
        &format!(
            "INSERT INTO blocked_cache (issue_id, blocker_count)
             SELECT d.issue_id, COUNT(*)
             FROM dependencies d
             INNER JOIN issues blocker ON blocker.id = d.depends_on_id
             WHERE d.type IN ({})
               AND blocker.status NOT IN ('closed', 'tombstone')
             GROUP BY d.issue_id",
            DependencyType::BLOCKING_SQL_LIST
        ),
        [],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, '1')",
        params![meta_keys::BLOCKED_CACHE_VALID],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Returns issues that are ready to work on.
    ///
    /// Ready means: status is "open" (or a configured pre-in-progress
    /// custom status), the issue is not a tombstone, and every blocking
    /// dependency points at a closed issue or a tombstone.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        ensure_blocked_cache(&conn)?;

        let mut where_clauses: Vec<String> = vec![
            "i.status != 'tombstone'".to_string(),
            "NOT EXISTS (SELECT 1 FROM blocked_cache b WHERE b.issue_id = i.id)".to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        // Ready statuses: "open" plus any configured extras.
        if filter.ready_statuses.is_empty() {
            where_clauses.push("i.status = 'open'".to_string());
        } else {
            let mut statuses = vec!["open".to_string()];
            statuses.extend(filter.ready_statuses.iter().cloned());
            let placeholders: Vec<String> = statuses
                .iter()
                .enumerate()
                .map(|(j, _)| format!("?{}", param_idx + j))
                .collect();
            where_clauses.push(format!("i.status IN ({})", placeholders.join(",")));
            for s in statuses {
                param_values.push(Box::new(s));
            }
            param_idx += filter.ready_statuses.len() + 1;
        }

        if let Some(ref issue_type) = filter.issue_type {
            where_clauses.push(format!("i.issue_type = ?{param_idx}"));
            param_values.push(Box::new(issue_type.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if filter.unassigned {
            where_clauses.push("i.assignee = ''".to_string());
        }

        // Label filters (AND).
        for label in &filter.labels {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label = ?{param_idx})"
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
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label IN ({}))",
                placeholders.join(",")
            ));
            for label in &filter.labels_any {
                param_values.push(Box::new(label.clone()));
            }
            param_idx += filter.labels_any.len();
        }

        let where_sql = where_clauses.join(" AND ");

        // Priority then age; both tie-break on id for determinism.
        let order_sql = match filter.sort_policy {
            SortPolicy::Oldest => "i.created_at ASC, i.id ASC",
            _ => "i.priority ASC, i.created_at ASC, i.id ASC",
        };

        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql} ORDER BY {order_sql}{limit_sql}"
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

    /// Returns issues that have at least one unresolved blocking dependency.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;
        ensure_blocked_cache(&conn)?;

        let mut where_clauses: Vec<String> = vec!["i.status != 'tombstone'".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS}, b.blocker_count
             FROM issues i
             INNER JOIN blocked_cache b ON b.issue_id = i.id
             WHERE {where_sql}
             ORDER BY i.priority ASC, i.created_at ASC, i.id ASC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let issue = scan_issue(row)?;
            let blocked_by_count: i32 = row.get("blocker_count")?;
            Ok(BlockedIssue {
                issue,
                blocked_by_count,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }

        let _ = param_idx;
        Ok(result)
    }

    /// Returns aggregate statistics.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let mut stats = Statistics::default();

        let count = |status: &str| -> Result<i64> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?)
        };

        stats.total_issues =
            conn.query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        stats.open_issues = count("open")?;
        stats.closed_issues = count("closed")?;
        stats.in_progress_issues = count("in_progress")?;
        stats.blocked_issues = count("blocked")?;
        stats.deferred_issues = count("deferred")?;
        stats.tombstones = count("tombstone")?;

        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues
                 WHERE status != 'tombstone'
                 GROUP BY issue_type ORDER BY COUNT(*) DESC, issue_type ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM issues
                 WHERE status != 'tombstone'
                 GROUP BY priority ORDER BY priority ASC",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }

        Ok(stats)
    }
}
