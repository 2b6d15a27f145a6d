//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations
//! so that alternative backends (mocks, proxies) can be substituted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use beads_core::comment::{Comment, Event};
use beads_core::dependency::Dependency;
use beads_core::enums::{IssueType, Status};
use beads_core::filter::{IssueFilter, PurgeFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
/// Double-`Option` fields distinguish "don't touch" from "clear".
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub close_reason: Option<String>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub external_ref: Option<Option<String>>,
    pub source_repo: Option<String>,
    pub await_type: Option<String>,
    pub await_id: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub semantic_slug: Option<String>,
    pub ephemeral: Option<bool>,
    pub pinned: Option<bool>,
}

impl IssueUpdates {
    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.owner.is_none()
            && self.close_reason.is_none()
            && self.closed_at.is_none()
            && self.external_ref.is_none()
            && self.source_repo.is_none()
            && self.await_type.is_none()
            && self.await_id.is_none()
            && self.source_ref.is_none()
            && self.target_ref.is_none()
            && self.semantic_slug.is_none()
            && self.ephemeral.is_none()
            && self.pinned.is_none()
    }
}

/// An issue that is blocked, along with the count of open blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// Number of unresolved blocking dependencies.
    pub blocked_by_count: i32,
}

/// Aggregate statistics about the issue database.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub closed_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub deferred_issues: i64,
    pub tombstones: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
}

// ---------------------------------------------------------------------------
// Backend capabilities
// ---------------------------------------------------------------------------

/// Which storage backend a workspace uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Single-file embedded store.
    Sqlite,
}

impl BackendKind {
    /// String form stored in `metadata.json`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses the string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Capability flags for this backend.
    pub fn capabilities(&self) -> BackendCaps {
        match self {
            Self::Sqlite => BackendCaps {
                single_process_only: true,
            },
        }
    }
}

/// Capability flags read before the daemon starts, to reject incompatible
/// combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCaps {
    /// Only one process may hold the store open at a time.
    pub single_process_only: bool,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Creates a new issue and emits a "created" event. Fails with
    /// `DuplicateId` if the ID exists (tombstones included).
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates multiple issues in a single transaction.
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;

    /// Retrieves an issue by ID. Tombstones are reported as `NotFound`.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves an issue by ID, tombstones included.
    fn get_issue_with_tombstones(&self, id: &str) -> Result<Issue>;

    /// Retrieves an issue by its external reference.
    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue>;

    /// Applies a field-set diff atomically. Rejects invalid status
    /// transitions, recomputes the content hash, and emits one "updated"
    /// event per changed field family.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (status=closed, closed_at=now) and emits a "closed"
    /// event.
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Marks an issue as a tombstone: free-form fields cleared, deletion
    /// metadata stamped, edges retained. Idempotent.
    fn tombstone_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Tombstones an issue and, recursively, every descendant reachable via
    /// parent-child edges. Other dependents are notified via an event.
    /// Returns the IDs tombstoned, root first.
    fn cascade_tombstone(&self, id: &str, reason: &str, actor: &str) -> Result<Vec<String>>;

    /// Full-text + structured search with deterministic ordering when a sort
    /// key is supplied.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Hard-deletes ephemeral, closed rows (pinned rows excluded) together
    /// with their labels, comments, events, and edges. Returns purged IDs.
    fn purge(&self, filter: &PurgeFilter) -> Result<Vec<String>>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge. Blocking edge types are checked for cycles;
    /// parent-child edges additionally enforce the single-parent rule and
    /// the depth bound.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Returns the issues the given issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns the issues that depend on the given issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns raw dependency records for an issue.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Work queries --------------------------------------------------------

    /// Returns open issues with no unresolved blocking dependencies, sorted
    /// by priority then age.
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns issues that have at least one unresolved blocking dependency.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    // -- Comments and events -------------------------------------------------

    /// Adds a comment to an issue and returns the created comment.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    // -- Statistics ----------------------------------------------------------

    /// Returns aggregate statistics about the issue database.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Configuration and metadata ------------------------------------------

    /// Sets a configuration key-value pair. Keys in the read-only `deploy.`
    /// namespace are rejected.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Deletes a configuration key.
    fn delete_config(&self, key: &str) -> Result<()>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<std::collections::HashMap<String, String>>;

    /// Sets an engine-internal metadata key.
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;

    /// Gets an engine-internal metadata key.
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction. `Ok` commits,
    /// `Err` rolls back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the database connection and releases resources.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single connection and commit or roll back
/// atomically.
pub trait Transaction {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn tombstone_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn get_issue_with_tombstones(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<()>;
    /// Inserts a comment preserving its original timestamp (manifest import).
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    // -- Manifest import primitives ------------------------------------------
    //
    // The import path writes rows exactly as merged: timestamps, deletion
    // metadata, and content hash are taken from the incoming issue so a
    // re-export reproduces the manifest byte for byte. No events are
    // emitted and no transition validation runs; the merge driver already
    // resolved intent.

    /// Inserts or replaces an issue row exactly as given.
    fn import_issue(&self, issue: &Issue) -> Result<()>;

    /// Replaces the full label set of an issue.
    fn replace_labels(&self, issue_id: &str, labels: &[String]) -> Result<()>;

    /// Replaces the full outbound dependency set of an issue.
    fn replace_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<()>;
}
