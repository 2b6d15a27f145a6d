//! External tracker contract.
//!
//! The core consumes trackers (Jira, GitHub, ...) through this interface;
//! it implements none of them. Adapters register at startup under a name;
//! [`TrackerSyncEngine`] composes a registered tracker with the storage
//! engine for pull/push/bidirectional sync.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use beads_storage::{IssueUpdates, Storage, StorageError};

/// Errors surfaced by tracker adapters and the sync engine.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker '{0}' is not registered")]
    UnknownTracker(String),

    #[error("tracker configuration error: {0}")]
    Config(String),

    #[error("tracker transport error: {0}")]
    Transport(String),

    #[error("external record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// A project on the external side.
#[derive(Debug, Clone)]
pub struct ExternalProject {
    pub key: String,
    pub name: String,
}

/// An issue as the external tracker sees it.
#[derive(Debug, Clone)]
pub struct ExternalIssue {
    /// Stable reference on the external side (URL or key).
    pub external_ref: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub assignee: String,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

/// Filter for fetching external issues.
#[derive(Debug, Clone, Default)]
pub struct FetchFilter {
    pub project: Option<String>,
    pub updated_since: Option<DateTime<Utc>>,
    pub open_only: bool,
}

/// The uniform contract every tracker adapter implements.
pub trait Tracker: Send {
    /// Validates configuration and opens any connections.
    fn init(&mut self, config: &HashMap<String, String>) -> Result<()>;

    /// Lists the projects visible to the configured credentials.
    fn list_projects(&mut self) -> Result<Vec<ExternalProject>>;

    /// Streams issues matching the filter.
    fn fetch_issues(
        &mut self,
        filter: &FetchFilter,
    ) -> Result<Box<dyn Iterator<Item = Result<ExternalIssue>> + '_>>;

    /// Creates an issue on the external side; returns its reference.
    fn create_issue(&mut self, issue: &ExternalIssue) -> Result<String>;

    /// Applies a changeset to an external issue.
    fn update_issue(&mut self, external_ref: &str, changeset: &IssueUpdates) -> Result<()>;

    /// Releases resources.
    fn close(&mut self) -> Result<()>;
}

/// Factory producing a fresh adapter instance.
pub type TrackerFactory = fn() -> Box<dyn Tracker>;

/// Registry of tracker adapters, keyed by name. Populated at startup.
#[derive(Default)]
pub struct TrackerRegistry {
    factories: HashMap<String, TrackerFactory>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under a name. Later registrations win, which
    /// lets embedders override a built-in.
    pub fn register(&mut self, name: &str, factory: TrackerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Instantiates a registered adapter.
    pub fn create(&self, name: &str) -> Result<Box<dyn Tracker>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| TrackerError::UnknownTracker(name.to_string()))
    }

    /// Names of all registered adapters, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Sync engine
// ---------------------------------------------------------------------------

/// Direction of a tracker sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// External tracker into the local store.
    Pull,
    /// Local store into the external tracker.
    Push,
    /// Both, pull first.
    Bidirectional,
}

/// Conflict policy when both sides changed the same issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Local copy wins.
    Local,
    /// External copy wins.
    External,
    /// Last writer wins.
    #[default]
    Timestamp,
}

/// Counters from one tracker sync run.
#[derive(Debug, Default, Clone)]
pub struct TrackerSyncReport {
    pub pulled_created: usize,
    pub pulled_updated: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub conflicts_resolved: usize,
}

/// Composes a tracker with the storage engine.
///
/// Progress and problems stream through the `on_message` / `on_warning`
/// callbacks so front-ends can render them live.
pub struct TrackerSyncEngine<'a> {
    store: &'a dyn Storage,
    tracker: Box<dyn Tracker>,
    policy: ConflictPolicy,
    on_message: Option<Box<dyn Fn(&str) + 'a>>,
    on_warning: Option<Box<dyn Fn(&str) + 'a>>,
}

impl<'a> TrackerSyncEngine<'a> {
    pub fn new(store: &'a dyn Storage, tracker: Box<dyn Tracker>, policy: ConflictPolicy) -> Self {
        Self {
            store,
            tracker,
            policy,
            on_message: None,
            on_warning: None,
        }
    }

    /// Installs the progress callback.
    pub fn on_message(mut self, f: impl Fn(&str) + 'a) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Installs the warning callback.
    pub fn on_warning(mut self, f: impl Fn(&str) + 'a) -> Self {
        self.on_warning = Some(Box::new(f));
        self
    }

    fn message(&self, text: &str) {
        if let Some(f) = &self.on_message {
            f(text);
        }
    }

    fn warning(&self, text: &str) {
        if let Some(f) = &self.on_warning {
            f(text);
        }
    }

    /// Runs one sync pass in the given direction.
    pub fn sync(&mut self, direction: SyncDirection, filter: &FetchFilter) -> Result<TrackerSyncReport> {
        let mut report = TrackerSyncReport::default();
        match direction {
            SyncDirection::Pull => self.pull(filter, &mut report)?,
            SyncDirection::Push => self.push(&mut report)?,
            SyncDirection::Bidirectional => {
                self.pull(filter, &mut report)?;
                self.push(&mut report)?;
            }
        }
        self.message(&format!(
            "tracker sync done: {} pulled, {} pushed",
            report.pulled_created + report.pulled_updated,
            report.pushed_created + report.pushed_updated,
        ));
        Ok(report)
    }

    /// External -> local. Issues are matched by `external_ref`.
    fn pull(&mut self, filter: &FetchFilter, report: &mut TrackerSyncReport) -> Result<()> {
        let external: Vec<ExternalIssue> = {
            let iter = self.tracker.fetch_issues(filter)?;
            iter.collect::<Result<Vec<_>>>()?
        };

        for ext in external {
            match self.store.get_issue_by_external_ref(&ext.external_ref) {
                Ok(local) => {
                    let apply = match self.policy {
                        ConflictPolicy::Local => false,
                        ConflictPolicy::External => true,
                        ConflictPolicy::Timestamp => ext.updated_at > local.updated_at,
                    };
                    if !apply {
                        continue;
                    }
                    if local.updated_at > ext.updated_at {
                        report.conflicts_resolved += 1;
                    }
                    let updates = IssueUpdates {
                        title: Some(ext.title.clone()),
                        description: Some(ext.description.clone()),
                        assignee: Some(ext.assignee.clone()),
                        ..Default::default()
                    };
                    self.store.update_issue(&local.id, &updates, "tracker-sync")?;
                    report.pulled_updated += 1;
                }
                Err(e) if e.is_not_found() => {
                    self.warning(&format!(
                        "external issue {} has no local counterpart; skipping (create is a front-end decision)",
                        ext.external_ref
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Local -> external. Issues without an `external_ref` are created;
    /// the returned reference is written back.
    fn push(&mut self, report: &mut TrackerSyncReport) -> Result<()> {
        let locals = self.store.search_issues(
            "",
            &beads_core::filter::IssueFilter::default(),
        )?;

        for local in locals {
            match &local.external_ref {
                Some(ext_ref) => {
                    let updates = IssueUpdates {
                        title: Some(local.title.clone()),
                        description: Some(local.description.clone()),
                        ..Default::default()
                    };
                    self.tracker.update_issue(ext_ref, &updates)?;
                    report.pushed_updated += 1;
                }
                None => {
                    let ext = ExternalIssue {
                        external_ref: String::new(),
                        title: local.title.clone(),
                        description: local.description.clone(),
                        status: local.status.as_str().to_string(),
                        assignee: local.assignee.clone(),
                        updated_at: local.updated_at,
                        labels: self.store.get_labels(&local.id)?,
                    };
                    let ext_ref = self.tracker.create_issue(&ext)?;
                    self.store.update_issue(
                        &local.id,
                        &IssueUpdates {
                            external_ref: Some(Some(ext_ref)),
                            ..Default::default()
                        },
                        "tracker-sync",
                    )?;
                    report.pushed_created += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;
    use beads_storage::SqliteStore;
    use std::sync::{Arc, Mutex};

    /// An in-memory adapter standing in for a real tracker.
    #[derive(Default)]
    struct FakeTracker {
        remote: Arc<Mutex<Vec<ExternalIssue>>>,
        next_key: usize,
    }

    impl Tracker for FakeTracker {
        fn init(&mut self, _config: &HashMap<String, String>) -> Result<()> {
            Ok(())
        }

        fn list_projects(&mut self) -> Result<Vec<ExternalProject>> {
            Ok(vec![ExternalProject {
                key: "FAKE".into(),
                name: "Fake".into(),
            }])
        }

        fn fetch_issues(
            &mut self,
            _filter: &FetchFilter,
        ) -> Result<Box<dyn Iterator<Item = Result<ExternalIssue>> + '_>> {
            let snapshot: Vec<ExternalIssue> = self.remote.lock().unwrap().clone();
            Ok(Box::new(snapshot.into_iter().map(Ok)))
        }

        fn create_issue(&mut self, issue: &ExternalIssue) -> Result<String> {
            self.next_key += 1;
            let ext_ref = format!("fake://{}", self.next_key);
            let mut stored = issue.clone();
            stored.external_ref = ext_ref.clone();
            self.remote.lock().unwrap().push(stored);
            Ok(ext_ref)
        }

        fn update_issue(&mut self, external_ref: &str, changeset: &IssueUpdates) -> Result<()> {
            let mut remote = self.remote.lock().unwrap();
            let issue = remote
                .iter_mut()
                .find(|i| i.external_ref == external_ref)
                .ok_or_else(|| TrackerError::NotFound(external_ref.to_string()))?;
            if let Some(ref t) = changeset.title {
                issue.title = t.clone();
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with_fake() -> TrackerRegistry {
        let mut registry = TrackerRegistry::new();
        registry.register("fake", || Box::new(FakeTracker::default()));
        registry
    }

    #[test]
    fn registry_create_and_unknown() {
        let registry = registry_with_fake();
        assert!(registry.create("fake").is_ok());
        assert!(matches!(
            registry.create("jira"),
            Err(TrackerError::UnknownTracker(_))
        ));
        assert_eq!(registry.names(), vec!["fake"]);
    }

    #[test]
    fn push_creates_and_writes_back_refs() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("local only").id("bd-aa111").build(), "a")
            .unwrap();

        let remote = Arc::new(Mutex::new(Vec::new()));
        let tracker = Box::new(FakeTracker {
            remote: remote.clone(),
            next_key: 0,
        });

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        let mut engine = TrackerSyncEngine::new(&store, tracker, ConflictPolicy::Timestamp)
            .on_message(move |m| sink.lock().unwrap().push(m.to_string()));

        let report = engine
            .sync(SyncDirection::Push, &FetchFilter::default())
            .unwrap();
        assert_eq!(report.pushed_created, 1);

        let local = store.get_issue_impl("bd-aa111").unwrap();
        assert_eq!(local.external_ref.as_deref(), Some("fake://1"));
        assert_eq!(remote.lock().unwrap().len(), 1);
        assert!(!messages.lock().unwrap().is_empty());
    }

    #[test]
    fn pull_updates_newer_external_copy() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("old title")
                    .id("bd-aa111")
                    .external_ref("fake://9")
                    .build(),
                "a",
            )
            .unwrap();

        let remote = Arc::new(Mutex::new(vec![ExternalIssue {
            external_ref: "fake://9".into(),
            title: "renamed upstream".into(),
            description: String::new(),
            status: "open".into(),
            assignee: String::new(),
            updated_at: Utc::now() + chrono::Duration::hours(1),
            labels: vec![],
        }]));
        let tracker = Box::new(FakeTracker {
            remote,
            next_key: 0,
        });

        let mut engine = TrackerSyncEngine::new(&store, tracker, ConflictPolicy::Timestamp);
        let report = engine
            .sync(SyncDirection::Pull, &FetchFilter::default())
            .unwrap();
        assert_eq!(report.pulled_updated, 1);

        let local = store.get_issue_impl("bd-aa111").unwrap();
        assert_eq!(local.title, "renamed upstream");
    }

    #[test]
    fn local_policy_never_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("precious")
                    .id("bd-aa111")
                    .external_ref("fake://9")
                    .build(),
                "a",
            )
            .unwrap();

        let remote = Arc::new(Mutex::new(vec![ExternalIssue {
            external_ref: "fake://9".into(),
            title: "upstream clobber".into(),
            description: String::new(),
            status: "open".into(),
            assignee: String::new(),
            updated_at: Utc::now() + chrono::Duration::hours(1),
            labels: vec![],
        }]));
        let tracker = Box::new(FakeTracker {
            remote,
            next_key: 0,
        });

        let mut engine = TrackerSyncEngine::new(&store, tracker, ConflictPolicy::Local);
        engine.sync(SyncDirection::Pull, &FetchFilter::default()).unwrap();

        let local = store.get_issue_impl("bd-aa111").unwrap();
        assert_eq!(local.title, "precious");
    }
}
