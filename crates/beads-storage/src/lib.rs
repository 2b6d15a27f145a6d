//! Storage backend for the beads synchronization engine.
//!
//! Provides the [`Storage`] trait and a SQLite implementation
//! ([`SqliteStore`]).

pub mod backend;
pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use backend::find_database;
pub use error::StorageError;
pub use sqlite::{SqliteStore, with_retry};
pub use traits::{
    BackendCaps, BackendKind, BlockedIssue, IssueUpdates, Statistics, Storage, Transaction,
};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use beads_core::comment::{Comment, Event};
use beads_core::dependency::Dependency;
use beads_core::filter::{IssueFilter, PurgeFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::Result;

impl Storage for SqliteStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.create_issue_impl(issue, actor)
    }

    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()> {
        self.create_issues_impl(issues, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.get_issue_impl(id)
    }

    fn get_issue_with_tombstones(&self, id: &str) -> Result<Issue> {
        self.get_issue_with_tombstones_impl(id)
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue> {
        self.get_issue_by_external_ref_impl(external_ref)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.update_issue_impl(id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.close_issue_impl(id, reason, actor)
    }

    fn tombstone_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.tombstone_issue_impl(id, reason, actor)
    }

    fn cascade_tombstone(&self, id: &str, reason: &str, actor: &str) -> Result<Vec<String>> {
        self.cascade_tombstone_impl(id, reason, actor)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.search_issues_impl(query, filter)
    }

    fn purge(&self, filter: &PurgeFilter) -> Result<Vec<String>> {
        self.purge_impl(filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_impl(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.remove_dependency_impl(issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependencies_impl(issue_id)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependents_impl(issue_id)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependency_records_impl(issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.add_label_impl(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.remove_label_impl(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(issue_id)
    }

    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.get_ready_work_impl(filter)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.get_blocked_issues_impl(filter)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.add_comment_impl(issue_id, author, text)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.get_comments_impl(issue_id)
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.get_events_impl(issue_id, limit)
    }

    fn get_statistics(&self) -> Result<Statistics> {
        self.get_statistics_impl()
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.get_config_impl(key)
    }

    fn delete_config(&self, key: &str) -> Result<()> {
        self.delete_config_impl(key)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.get_all_config_impl()
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.set_metadata_impl(key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        self.get_metadata_impl(key)
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }

    fn close(&self) -> Result<()> {
        // The connection is closed when the store is dropped.
        Ok(())
    }
}
