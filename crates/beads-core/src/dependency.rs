//! Dependency types -- typed edges between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;
use crate::timefmt;

/// A directed edge from `issue_id` to `depends_on_id`.
///
/// Edges survive tombstoning of either endpoint so that deletion signals
/// propagate across merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    /// Dependency type (serialised as "type" in JSON).
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    #[serde(default = "Utc::now", with = "timefmt")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl Dependency {
    /// Constructs an edge of the given type.
    pub fn new(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: String::new(),
        }
    }

    /// Returns `true` if this edge prevents the source issue from being ready.
    pub fn is_blocking(&self) -> bool {
        self.dep_type.is_blocking()
    }
}

/// Counts for dependencies and dependents of one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCounts {
    /// Number of issues this issue depends on.
    pub dependency_count: i32,
    /// Number of issues that depend on this issue.
    pub dependent_count: i32,
}
