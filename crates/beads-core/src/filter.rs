//! Filter types for querying issues.

use chrono::{DateTime, Utc};

use crate::enums::{IssueType, SortPolicy, Status};

/// Sort key for deterministic query ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Priority,
    CreatedAt,
    UpdatedAt,
    Id,
}

impl SortKey {
    /// Returns the SQL column expression for this sort key.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Id => "id",
        }
    }
}

/// Filter for issue queries.
///
/// Tombstones are excluded unless `include_tombstones` is set.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,

    /// Exact priority.
    pub priority: Option<i32>,
    // Priority range.
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    /// Filter by specific issue IDs.
    pub ids: Vec<String>,
    /// Filter by ID prefix (e.g., "bd-" to match "bd-a3f8z").
    pub id_prefix: Option<String>,

    // Pattern matching.
    pub title_contains: Option<String>,
    pub description_contains: Option<String>,

    // Date ranges.
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub closed_after: Option<DateTime<Utc>>,
    pub closed_before: Option<DateTime<Utc>>,

    // Empty/null checks.
    pub no_assignee: bool,
    pub empty_description: bool,
    pub no_labels: bool,

    /// Filter by ephemeral flag (None = any).
    pub ephemeral: Option<bool>,
    /// Filter by pinned flag (None = any).
    pub pinned: Option<bool>,
    /// Filter by source_repo (None = any).
    pub source_repo: Option<String>,

    /// Include tombstoned issues in the result.
    pub include_tombstones: bool,

    pub limit: Option<i32>,
    /// Deterministic ordering when supplied.
    pub sort: Option<SortKey>,
}

impl IssueFilter {
    /// A filter that matches everything, tombstones included.
    pub fn everything() -> Self {
        Self {
            include_tombstones: true,
            ..Self::default()
        }
    }
}

/// Filter for ready work queries.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    /// Filter by issue type string.
    pub issue_type: Option<String>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    /// Filter for issues with no assignee.
    pub unassigned: bool,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    pub limit: Option<i32>,
    pub sort_policy: SortPolicy,

    /// Project-configured pre-in-progress statuses that also count as
    /// ready (besides "open").
    pub ready_statuses: Vec<String>,
}

/// Filter for the bulk purge operation.
///
/// Purge targets only ephemeral, closed rows; these fields narrow further.
#[derive(Debug, Clone, Default)]
pub struct PurgeFilter {
    /// Glob on the issue ID (e.g., "bd-wisp-*").
    pub id_glob: Option<String>,
    /// Only rows not updated within this many days.
    pub older_than_days: Option<i64>,
    /// Substring match on the title.
    pub title_pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_filter_defaults() {
        let f = IssueFilter::default();
        assert!(f.status.is_none());
        assert!(f.priority.is_none());
        assert!(f.labels.is_empty());
        assert!(!f.include_tombstones);
        assert!(f.sort.is_none());
    }

    #[test]
    fn everything_includes_tombstones() {
        assert!(IssueFilter::everything().include_tombstones);
    }

    #[test]
    fn work_filter_defaults() {
        let f = WorkFilter::default();
        assert_eq!(f.sort_policy, SortPolicy::Hybrid);
        assert!(!f.unassigned);
        assert!(f.ready_statuses.is_empty());
    }

    #[test]
    fn sort_key_columns() {
        assert_eq!(SortKey::Priority.column(), "priority");
        assert_eq!(SortKey::UpdatedAt.column(), "updated_at");
    }
}
