//! Auto-sync engine: export, commit, push, pull, import, with failure
//! backoff.
//!
//! One entry point, [`SyncEngine::sync`], driven by the CLI or by the
//! daemon's periodic tick. Git work touches only the manifest files under
//! `.beads/`; other staged changes are never swept into a sync commit.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use beads_config::{BeadsConfig, manifest_path, workspace_root};
use beads_git::commands as git;
use beads_git::gitdir;
use beads_storage::Storage;

use crate::export::{ExportOutcome, export_to_manifest};
use crate::freshness::{Freshness, evaluate_freshness};
use crate::gitignore::ensure_gitignore;
use crate::import::{ImportOutcome, import_manifest};
use crate::{Result, SyncError};

/// Marker file recording the backoff state, surfaced by `status`.
pub const BACKOFF_FILE: &str = "sync-backoff.json";

/// Failures tolerated before backoff kicks in.
const BACKOFF_THRESHOLD: u32 = 3;

/// First backoff delay once the threshold is crossed.
const BACKOFF_BASE_SECS: i64 = 30;

/// Backoff ceiling.
const BACKOFF_CAP_SECS: i64 = 900;

/// How conflicting external-tracker changes are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Local copy wins.
    Local,
    /// External copy wins.
    External,
    /// Last writer wins (default).
    #[default]
    Timestamp,
}

/// Options for one `sync` invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Fetch and re-import after exporting.
    pub pull: bool,
    /// Push after committing.
    pub push: bool,
    /// Report what would happen without touching the manifest or git.
    pub dry_run: bool,
    /// Tracker sync: only create missing issues, never update.
    pub create_only: bool,
    /// Tracker sync: refresh external_ref fields.
    pub update_refs: bool,
    /// Conflict policy for inter-workspace conflicts.
    pub conflict_resolution: ConflictResolution,
    /// Skip commit entirely (export only).
    pub no_git_history: bool,
    /// Proceed even when the freshness check says the database is stale.
    pub allow_stale: bool,
}

/// What one sync pass did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub imported: Option<ImportOutcome>,
    pub exported: Option<ExportOutcome>,
    pub committed: bool,
    pub pushed: bool,
    pub pulled: bool,
    /// Sync was skipped because the engine is backing off after repeated
    /// failures.
    pub skipped_backoff: bool,
    pub warnings: Vec<String>,
}

/// Persisted backoff state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct BackoffState {
    consecutive_failures: u32,
    #[serde(default)]
    next_retry_at: Option<DateTime<Utc>>,
}

/// The auto-sync engine for one workspace.
pub struct SyncEngine<'a> {
    store: &'a dyn Storage,
    beads_dir: PathBuf,
    config: BeadsConfig,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn Storage, beads_dir: &Path, config: BeadsConfig) -> Self {
        Self {
            store,
            beads_dir: beads_dir.to_path_buf(),
            config,
        }
    }

    /// Runs one sync pass. Phases: freshness check (+import), export,
    /// commit, push, pull (+import). Failures escalate the backoff marker;
    /// success clears it.
    pub fn sync(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if let Some(until) = self.backoff_active() {
            warn!(%until, "sync suppressed by backoff");
            report.skipped_backoff = true;
            return Ok(report);
        }

        let result = self.sync_inner(opts, &mut report);
        match &result {
            Ok(()) => self.record_success(),
            Err(SyncError::Git(beads_git::GitError::PermissionDenied(msg))) => {
                // Transient: inform once, back off, do not loop.
                report.warnings.push(format!("push rejected: {msg}"));
                self.record_failure();
                return Ok(report);
            }
            Err(_) => self.record_failure(),
        }
        result.map(|()| report)
    }

    fn sync_inner(&self, opts: &SyncOptions, report: &mut SyncReport) -> Result<()> {
        let manifest = manifest_path(&self.beads_dir);

        // Inbound first: a stale database must not export.
        let verdict = evaluate_freshness(self.store, &manifest)?;
        if verdict.wants_import() {
            if opts.dry_run {
                report
                    .warnings
                    .push("dry run: manifest is newer, would import".into());
            } else {
                report.imported = Some(import_manifest(self.store, &self.beads_dir)?);
            }
        }

        if opts.dry_run {
            report.warnings.push(format!(
                "dry run: freshness verdict {:?}, no files written",
                verdict
            ));
            return Ok(());
        }

        // Export, falling back to import-then-export when the reverse
        // zero-file-change guard fires.
        let exported = match export_to_manifest(self.store, &self.beads_dir, opts.allow_stale) {
            Ok(outcome) => outcome,
            Err(SyncError::ExportShrink { db_count, manifest_count }) => {
                warn!(
                    db_count,
                    manifest_count, "export would shrink the manifest; importing instead"
                );
                report.imported = Some(import_manifest(self.store, &self.beads_dir)?);
                export_to_manifest(self.store, &self.beads_dir, false)?
            }
            Err(e) => return Err(e),
        };
        let wrote = matches!(exported, ExportOutcome::Written { .. });
        report.exported = Some(exported);

        ensure_gitignore(&self.beads_dir)?;

        // Git phases only apply inside a repository.
        let Some(repo) = gitdir::find_git_root(&workspace_root(&self.beads_dir)) else {
            return Ok(());
        };

        if self.config.sync.auto_commit && !opts.no_git_history && wrote {
            self.commit_manifest(&repo, report)?;
        }

        if opts.push || self.config.sync.auto_push {
            self.push(&repo, report)?;
        }

        if opts.pull || self.config.sync.auto_pull {
            self.pull(&repo, report)?;
        }

        Ok(())
    }

    /// Stages only the manifest files under `.beads/` and commits.
    fn commit_manifest(&self, repo: &Path, report: &mut SyncReport) -> Result<()> {
        let manifest_rel = self.rel_to_repo(repo, &manifest_path(&self.beads_dir));
        let gitignore_rel = self.rel_to_repo(repo, &self.beads_dir.join(".gitignore"));
        let paths: Vec<&str> = vec![&manifest_rel, &gitignore_rel];

        if !git::has_changes(repo, &paths)? {
            return Ok(());
        }

        git::add_paths(repo, &paths)?;
        let stats = self.store.get_statistics()?;
        let message = format!(
            "bd: sync {} issues ({} open)",
            stats.total_issues, stats.open_issues
        );
        let author = (!self.config.git.author.is_empty()).then_some(self.config.git.author.as_str());
        git::commit(repo, &message, author, self.config.git.no_gpg_sign, &paths)?;
        report.committed = true;
        info!(%message, "committed manifest");
        Ok(())
    }

    fn push(&self, repo: &Path, report: &mut SyncReport) -> Result<()> {
        let branch = if self.config.sync.branch.is_empty() {
            git::current_branch(repo)?
        } else {
            self.config.sync.branch.clone()
        };

        match git::upstream_of(repo, &branch) {
            Ok(_) => {}
            Err(beads_git::GitError::NoUpstream { branch }) => {
                report
                    .warnings
                    .push(format!("no upstream for {branch}; skipping push"));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        git::push(repo, &branch)?;
        report.pushed = true;
        Ok(())
    }

    fn pull(&self, repo: &Path, report: &mut SyncReport) -> Result<()> {
        git::fetch(repo)?;
        git::pull(repo)?;
        report.pulled = true;

        // The pull may have rewritten the manifest (merge driver included);
        // re-run the freshness protocol.
        let manifest = manifest_path(&self.beads_dir);
        if evaluate_freshness(self.store, &manifest)?.wants_import() {
            let outcome = import_manifest(self.store, &self.beads_dir)?;
            match &mut report.imported {
                Some(prev) => {
                    prev.created += outcome.created;
                    prev.updated += outcome.updated;
                    prev.warnings.extend(outcome.warnings);
                }
                None => report.imported = Some(outcome),
            }
        }
        Ok(())
    }

    fn rel_to_repo(&self, repo: &Path, path: &Path) -> String {
        path.strip_prefix(repo)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    // -- Backoff --------------------------------------------------------------

    fn backoff_path(&self) -> PathBuf {
        self.beads_dir.join(BACKOFF_FILE)
    }

    fn load_backoff(&self) -> BackoffState {
        std::fs::read_to_string(self.backoff_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Returns the retry deadline if sync is currently suppressed.
    pub fn backoff_active(&self) -> Option<DateTime<Utc>> {
        let state = self.load_backoff();
        state.next_retry_at.filter(|until| *until > Utc::now())
    }

    fn record_failure(&self) {
        let mut state = self.load_backoff();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= BACKOFF_THRESHOLD {
            let exponent = state.consecutive_failures - BACKOFF_THRESHOLD;
            let delay = (BACKOFF_BASE_SECS << exponent.min(16)).min(BACKOFF_CAP_SECS);
            state.next_retry_at = Some(Utc::now() + ChronoDuration::seconds(delay));
            warn!(
                failures = state.consecutive_failures,
                delay_secs = delay,
                "sync failures escalating to backoff"
            );
        }
        if let Ok(json) = serde_json::to_string_pretty(&state) {
            let _ = std::fs::write(self.backoff_path(), json);
        }
    }

    fn record_success(&self) {
        let _ = std::fs::remove_file(self.backoff_path());
    }
}
