//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use beads_core::comment::Comment;
use beads_core::dependency::Dependency;
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::comments;
use crate::sqlite::config;
use crate::sqlite::dependencies;
use crate::sqlite::issues;
use crate::sqlite::labels;
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueUpdates, Transaction};

/// A thin wrapper around a connection with an active transaction.
///
/// Delegates to the same connection-level helpers used by [`SqliteStore`],
/// so the semantics inside and outside a transaction are identical.
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(self.conn, issue, actor)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        issues::close_issue_on_conn(self.conn, id, reason, actor)
    }

    fn tombstone_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        issues::tombstone_issue_on_conn(self.conn, id, reason, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn get_issue_with_tombstones(&self, id: &str) -> Result<Issue> {
        issues::get_issue_with_tombstones_on_conn(self.conn, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<()> {
        comments::add_comment_on_conn(self.conn, issue_id, author, text).map(|_| ())
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }

    fn import_issue(&self, issue: &Issue) -> Result<()> {
        issues::import_issue_on_conn(self.conn, issue)
    }

    fn replace_labels(&self, issue_id: &str, labels_list: &[String]) -> Result<()> {
        labels::replace_labels_on_conn(self.conn, issue_id, labels_list)
    }

    fn replace_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<()> {
        dependencies::replace_dependencies_on_conn(self.conn, issue_id, deps)
    }
}

impl SqliteStore {
    /// Runs a closure inside a database transaction. A transaction never
    /// outlives this call: it is committed or rolled back before returning.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx { conn: &tx };
        match f(&sqlite_tx) {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // Transaction is rolled back on drop.
                Err(e)
            }
        }
    }
}
