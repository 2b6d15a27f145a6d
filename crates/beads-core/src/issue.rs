//! Issue struct -- the central domain model for the beads system.
//!
//! Field declaration order is load-bearing: the JSONL exporter serialises
//! fields in this order, and the manifest must be byte-stable across
//! re-exports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::comment::Comment;
use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};
use crate::timefmt;

/// Placeholder title carried by every tombstone.
pub const TOMBSTONE_TITLE: &str = "[deleted]";

/// Helper for `skip_serializing_if` on `bool` fields.
fn is_false(b: &bool) -> bool {
    !b
}

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// Represents a trackable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Core Identification =====
    #[serde(default)]
    pub id: String,

    /// Internal: SHA-256 of the canonical form -- NOT exported to JSONL.
    #[serde(skip)]
    pub content_hash: String,

    // ===== Issue Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    // ===== Status & Workflow =====
    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Priority 0-4. Never skipped: 0 is valid (P0/critical).
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    // ===== Timestamps =====
    #[serde(default = "Utc::now", with = "timefmt")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now", with = "timefmt")]
    pub updated_at: DateTime<Utc>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timefmt::opt"
    )]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    // ===== Tombstone Fields =====
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timefmt::opt"
    )]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_reason: String,

    /// The type the issue had before it was tombstoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<IssueType>,

    // ===== Lifecycle Flags =====
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    // ===== External Integration =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Which workspace owns this issue (cross-workspace provenance).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_repo: String,

    // ===== Gate Fields =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub await_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub await_id: String,

    // ===== Merge-Request Fields =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_ref: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_ref: String,

    // ===== Alias =====
    /// Human-readable alias. Excluded from the canonical form.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub semantic_slug: String,

    // ===== Relational Data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub comments: Vec<Comment>,

    // ===== Unknown Fields =====
    /// Fields from newer versions round-trip through here untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: String::new(),
            owner: String::new(),
            created_by: String::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            deleted_at: None,
            deleted_by: String::new(),
            delete_reason: String::new(),
            original_type: None,
            ephemeral: false,
            pinned: false,
            external_ref: None,
            source_repo: String::new(),
            await_type: String::new(),
            await_id: String::new(),
            source_ref: String::new(),
            target_ref: String::new(),
            semantic_slug: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Issue {
    /// Returns `true` if this issue is logically deleted.
    pub fn is_tombstone(&self) -> bool {
        self.status.is_tombstone()
    }

    /// Converts this issue into a tombstone in place.
    ///
    /// Preserves id, created_at, edges (held in storage), ephemeral and
    /// pinned flags. Clears the free-form fields, stamps the deletion
    /// metadata, and remembers the original type. Idempotent: tombstoning a
    /// tombstone leaves the original deletion record untouched.
    pub fn tombstone(&mut self, reason: &str, actor: &str, at: DateTime<Utc>) {
        if self.is_tombstone() {
            return;
        }
        self.original_type = Some(self.issue_type.clone());
        self.status = Status::Tombstone;
        self.title = TOMBSTONE_TITLE.to_string();
        self.description.clear();
        self.design.clear();
        self.acceptance_criteria.clear();
        self.semantic_slug.clear();
        self.assignee.clear();
        self.labels.clear();
        self.comments.clear();
        self.deleted_at = Some(at);
        self.deleted_by = actor.to_string();
        self.delete_reason = reason.to_string();
        self.updated_at = at;
    }

    /// Applies default values for fields omitted during JSONL import.
    pub fn set_defaults(&mut self) {
        if self.status.as_str().is_empty() {
            self.status = Status::Open;
        }
        if self.issue_type.as_str().is_empty() {
            self.issue_type = IssueType::Task;
        }
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.issue.owner = owner.into();
        self
    }

    pub fn created_by(mut self, by: impl Into<String>) -> Self {
        self.issue.created_by = by.into();
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.issue.ephemeral = ephemeral;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.issue.pinned = pinned;
        self
    }

    pub fn external_ref(mut self, ext: impl Into<String>) -> Self {
        self.issue.external_ref = Some(ext.into());
        self
    }

    pub fn source_repo(mut self, repo: impl Into<String>) -> Self {
        self.issue.source_repo = repo.into();
        self
    }

    pub fn await_type(mut self, t: impl Into<String>) -> Self {
        self.issue.await_type = t.into();
        self
    }

    pub fn await_id(mut self, id: impl Into<String>) -> Self {
        self.issue.await_id = id.into();
        self
    }

    pub fn source_ref(mut self, r: impl Into<String>) -> Self {
        self.issue.source_ref = r.into();
        self
    }

    pub fn target_ref(mut self, r: impl Into<String>) -> Self {
        self.issue.target_ref = r.into();
        self
    }

    pub fn semantic_slug(mut self, slug: impl Into<String>) -> Self {
        self.issue.semantic_slug = slug.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    /// Consumes the builder and returns the constructed [`Issue`].
    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, 2);
        assert!(!issue.is_tombstone());
    }

    #[test]
    fn builder_basic() {
        let issue = IssueBuilder::new("Fix the bug")
            .priority(1)
            .status(Status::InProgress)
            .issue_type(IssueType::Bug)
            .assignee("alice")
            .build();

        assert_eq!(issue.title, "Fix the bug");
        assert_eq!(issue.priority, 1);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.assignee, "alice");
    }

    #[test]
    fn issue_serde_roundtrip() {
        let issue = IssueBuilder::new("Test issue")
            .id("bd-abc12")
            .priority(1)
            .description("A test description")
            .build();

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();

        assert_eq!(back.title, "Test issue");
        assert_eq!(back.id, "bd-abc12");
        assert_eq!(back.priority, 1);
        assert_eq!(back.description, "A test description");
    }

    #[test]
    fn tombstone_clears_free_form() {
        let mut issue = IssueBuilder::new("Secret work")
            .id("bd-xyz99")
            .description("sensitive")
            .design("internal")
            .issue_type(IssueType::Feature)
            .labels(vec!["team-a".into()])
            .build();

        let at = Utc::now();
        issue.tombstone("obsolete", "alice", at);

        assert!(issue.is_tombstone());
        assert_eq!(issue.title, TOMBSTONE_TITLE);
        assert!(issue.description.is_empty());
        assert!(issue.design.is_empty());
        assert!(issue.labels.is_empty());
        assert_eq!(issue.original_type, Some(IssueType::Feature));
        assert_eq!(issue.deleted_by, "alice");
        assert_eq!(issue.delete_reason, "obsolete");
        assert_eq!(issue.deleted_at, Some(at));
        assert_eq!(issue.updated_at, at);
    }

    #[test]
    fn tombstone_is_idempotent() {
        let mut issue = IssueBuilder::new("Work").id("bd-abc12").build();
        let t1 = Utc::now();
        issue.tombstone("first", "alice", t1);
        let snapshot = issue.clone();

        issue.tombstone("second", "bob", Utc::now());
        assert_eq!(issue.delete_reason, snapshot.delete_reason);
        assert_eq!(issue.deleted_by, snapshot.deleted_by);
        assert_eq!(issue.deleted_at, snapshot.deleted_at);
    }

    #[test]
    fn unknown_fields_roundtrip() {
        let json = r#"{"id":"bd-a1b2c","title":"hello","novel_field":42}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.extra.get("novel_field").and_then(|v| v.as_i64()), Some(42));

        let out = serde_json::to_string(&issue).unwrap();
        assert!(out.contains("novel_field"));
    }
}
