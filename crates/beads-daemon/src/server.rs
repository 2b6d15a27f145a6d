//! The daemon: request dispatch and the socket accept loop.
//!
//! Worker threads share the storage engine; the engine's single-writer
//! mutex makes writes linearizable. Mutations mark the workspace dirty,
//! which schedules a debounced export. Client disconnects cancel the
//! handler silently (no event is emitted for cancellation).

use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use beads_config::{BeadsConfig, manifest_path, resolve_value};
use beads_core::dependency::Dependency;
use beads_core::enums::{DependencyType, IssueType, Status};
use beads_core::filter::{IssueFilter, PurgeFilter, WorkFilter};
use beads_core::issue::{Issue, IssueBuilder};
use beads_core::{idgen, timefmt};
use beads_storage::{IssueUpdates, SqliteStore, Storage};
use beads_sync::{DirtyTracker, SyncEngine, SyncOptions, evaluate_freshness, import_manifest};

use crate::protocol::{Op, PROTOCOL_VERSION, Request, Response, RpcError, read_frame, write_frame};
use crate::startup::DaemonContext;
use crate::watcher::ManifestWatcher;

/// Per-connection read deadline. A client that goes quiet longer than this
/// is treated as disconnected.
const CONNECTION_IDLE: Duration = Duration::from_secs(30);

/// Grace window for draining in-flight requests at shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// State shared by every worker thread.
pub struct DaemonState {
    pub store: Arc<SqliteStore>,
    pub config: BeadsConfig,
    pub beads_dir: PathBuf,
    pub dirty: DirtyTracker,
    pub started: Instant,
    /// Set by the signal handler or a shutdown RPC.
    pub shutdown: AtomicBool,
}

impl DaemonState {
    fn actor_or<'a>(&self, requested: &'a Option<String>) -> &'a str {
        match requested {
            Some(a) if !a.is_empty() => a,
            _ => "daemon",
        }
    }
}

/// The daemon server: owns the listener and the background jobs.
pub struct Server {
    state: Arc<DaemonState>,
    listener: UnixListener,
    socket_path: PathBuf,
    pid_file: PathBuf,
}

impl Server {
    /// Binds the socket and wires the background jobs.
    pub fn bind(ctx: DaemonContext) -> std::io::Result<(Self, WorkspaceGuard)> {
        let DaemonContext {
            store,
            config,
            beads_dir,
            socket_path,
            lock,
        } = ctx;

        let store = Arc::new(store);
        let debounce = Duration::from_secs(config.sync.debounce_seconds.max(1));

        // The debounced flush exports the manifest after writes go quiet.
        let flush_store = store.clone();
        let flush_dir = beads_dir.clone();
        let dirty = DirtyTracker::spawn(debounce, move || {
            match beads_sync::export_to_manifest(flush_store.as_ref(), &flush_dir, false) {
                Ok(outcome) => debug!(?outcome, "debounced export"),
                Err(e) => warn!(error = %e, "debounced export failed"),
            }
        });

        let state = Arc::new(DaemonState {
            store,
            config,
            beads_dir,
            dirty,
            started: Instant::now(),
            shutdown: AtomicBool::new(false),
        });

        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        info!(socket = %socket_path.display(), "daemon listening");

        let pid_file = state.beads_dir.join(crate::socket::PID_FILE_NAME);
        Ok((
            Self {
                state,
                listener,
                socket_path,
                pid_file,
            },
            WorkspaceGuard { _lock: lock },
        ))
    }

    /// Shared daemon state (exposed for the binary's signal handler).
    pub fn state(&self) -> Arc<DaemonState> {
        self.state.clone()
    }

    /// Runs the accept loop until shutdown, then drains, exports, and
    /// unregisters.
    pub fn run(self) -> std::io::Result<()> {
        let watcher = self.spawn_watcher();
        let ticker = self.spawn_ticker();

        let mut workers: Vec<std::thread::JoinHandle<()>> = Vec::new();

        while !self.state.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    workers.push(std::thread::spawn(move || {
                        handle_connection(state, stream);
                    }));
                    workers.retain(|h| !h.is_finished());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }

        info!("shutting down: draining in-flight requests");
        if let Some(w) = watcher {
            w.stop();
        }
        drop(ticker);

        let deadline = Instant::now() + DRAIN_GRACE;
        for handle in workers {
            if Instant::now() >= deadline {
                warn!("drain grace expired with workers still running");
                break;
            }
            let _ = handle.join();
        }

        // Final export so the manifest reflects every committed write.
        if let Err(e) =
            beads_sync::export_to_manifest(self.state.store.as_ref(), &self.state.beads_dir, false)
        {
            warn!(error = %e, "final export failed");
        }

        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_file);
        info!("daemon stopped");
        Ok(())
    }

    /// Watches the manifest and re-imports through the freshness protocol.
    fn spawn_watcher(&self) -> Option<ManifestWatcher> {
        let manifest = manifest_path(&self.state.beads_dir);
        let store = self.state.store.clone();
        let beads_dir = self.state.beads_dir.clone();
        let poll = Duration::from_secs(self.state.config.daemon.watch_seconds.max(1));

        Some(ManifestWatcher::spawn(
            manifest.clone(),
            poll,
            Duration::from_millis(500),
            move || {
                match evaluate_freshness(store.as_ref(), &manifest) {
                    Ok(verdict) if verdict.wants_import() => {
                        match import_manifest(store.as_ref(), &beads_dir) {
                            Ok(outcome) => info!(
                                created = outcome.created,
                                updated = outcome.updated,
                                "re-imported after manifest change"
                            ),
                            Err(e) => warn!(error = %e, "watch-triggered import failed"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "freshness check failed"),
                }
            },
        ))
    }

    /// Periodic sync tick.
    fn spawn_ticker(&self) -> TickerGuard {
        let state = self.state.clone();
        let period = Duration::from_secs(state.config.daemon.tick_seconds.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut last = Instant::now();
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(200));
                if last.elapsed() < period {
                    continue;
                }
                last = Instant::now();
                if !state.config.sync.auto_pull && !state.config.sync.auto_push {
                    continue;
                }
                let engine =
                    SyncEngine::new(state.store.as_ref(), &state.beads_dir, state.config.clone());
                let opts = SyncOptions {
                    pull: state.config.sync.auto_pull,
                    push: state.config.sync.auto_push,
                    ..Default::default()
                };
                if let Err(e) = engine.sync(&opts) {
                    warn!(error = %e, "periodic sync failed");
                }
            }
        });

        TickerGuard {
            stop,
            handle: Some(handle),
        }
    }
}

/// Keeps the workspace lock alive for the daemon's lifetime.
pub struct WorkspaceGuard {
    _lock: beads_lockfile::WorkspaceLock,
}

struct TickerGuard {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Writes a crash report and returns its path. Called from the binary's
/// panic hook.
pub fn write_crash_report(beads_dir: &std::path::Path, payload: &str) -> PathBuf {
    let path = beads_dir.join(format!("crash-{}.log", std::process::id()));
    let report = format!(
        "beads daemon crash at {}\n\n{payload}\n",
        timefmt::format_ts(&chrono::Utc::now())
    );
    let _ = std::fs::write(&path, report);
    path
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

fn handle_connection(state: Arc<DaemonState>, stream: UnixStream) {
    let _ = stream.set_read_timeout(Some(CONNECTION_IDLE));
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });
    let mut writer = BufWriter::new(stream);

    loop {
        let request: Request = match read_frame(&mut reader) {
            Ok(Some(req)) => req,
            // Clean disconnect: cancellation, not an error.
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "connection closed");
                return;
            }
        };

        let response = handle_request(&state, request);
        if write_frame(&mut writer, &response).is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    design: String,
    #[serde(default)]
    acceptance_criteria: String,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    assignee: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    ephemeral: bool,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    design: Option<String>,
    #[serde(default)]
    acceptance_criteria: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    ephemeral: Option<bool>,
    #[serde(default)]
    pinned: Option<bool>,
    #[serde(default)]
    semantic_slug: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    cascade: bool,
    #[serde(default)]
    include_tombstones: bool,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DependencyArgs {
    issue_id: String,
    depends_on_id: String,
    #[serde(default)]
    dep_type: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelArgs {
    id: String,
    label: String,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentArgs {
    id: String,
    text: String,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ListArgs {
    #[serde(default)]
    query: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    include_tombstones: bool,
    #[serde(default)]
    limit: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReadyArgs {
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    limit: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct SyncArgs {
    #[serde(default)]
    push: bool,
    #[serde(default)]
    pull: bool,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    allow_stale: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigArgs {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecisionArgs {
    id: String,
    resolution: String,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    args: Value,
}

/// Dispatches one request against the shared state.
pub fn handle_request(state: &DaemonState, request: Request) -> Response {
    let id = request.id;
    match dispatch(state, request) {
        Ok(data) => Response::ok(id, data),
        Err(e) => Response::err(id, e),
    }
}

fn dispatch(state: &DaemonState, request: Request) -> Result<Value, RpcError> {
    let store: &dyn Storage = state.store.as_ref();

    match request.op {
        Op::Health => Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": PROTOCOL_VERSION,
            "uptime_secs": state.started.elapsed().as_secs(),
        })),

        Op::Stats => {
            let stats = store.get_statistics().map_err(|e| RpcError::from(&e))?;
            serde_json::to_value(stats).map_err(internal)
        }

        Op::List | Op::Search => {
            let args: ListArgs = parse_args(request.args)?;
            let filter = IssueFilter {
                status: args.status.map(Status::from),
                issue_type: args.issue_type.map(IssueType::from),
                assignee: args.assignee,
                include_tombstones: args.include_tombstones,
                limit: args.limit,
                sort: Some(beads_core::filter::SortKey::CreatedAt),
                ..Default::default()
            };
            let issues = store
                .search_issues(&args.query, &filter)
                .map_err(|e| RpcError::from(&e))?;
            serde_json::to_value(issues).map_err(internal)
        }

        Op::Show => {
            let args: IdArgs = parse_args(request.args)?;
            let mut issue = if args.include_tombstones {
                store.get_issue_with_tombstones(&args.id)
            } else {
                store.get_issue(&args.id)
            }
            .map_err(|e| RpcError::from(&e))?;
            issue.labels = store.get_labels(&issue.id).map_err(|e| RpcError::from(&e))?;
            issue.dependencies = store
                .get_dependency_records(&issue.id)
                .map_err(|e| RpcError::from(&e))?;
            issue.comments = store
                .get_comments(&issue.id)
                .map_err(|e| RpcError::from(&e))?;
            serde_json::to_value(issue).map_err(internal)
        }

        Op::Create => {
            let args: CreateArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let issue = build_issue(state, store, &args, &actor)?;
            let new_id = issue.id.clone();
            store
                .create_issue(&issue, &actor)
                .map_err(|e| RpcError::from(&e))?;
            for label in &args.labels {
                store
                    .add_label(&new_id, label, &actor)
                    .map_err(|e| RpcError::from(&e))?;
            }
            state.dirty.mark_dirty();
            Ok(json!({"id": new_id}))
        }

        Op::Update => {
            let args: UpdateArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let updates = IssueUpdates {
                title: args.title,
                description: args.description,
                design: args.design,
                acceptance_criteria: args.acceptance_criteria,
                status: args.status.map(Status::from),
                priority: args.priority,
                issue_type: args.issue_type.map(IssueType::from),
                assignee: args.assignee,
                owner: args.owner,
                ephemeral: args.ephemeral,
                pinned: args.pinned,
                semantic_slug: args.semantic_slug,
                ..Default::default()
            };
            store
                .update_issue(&args.id, &updates, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::Close => {
            let args: IdArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            store
                .close_issue(&args.id, &args.reason, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::Delete => {
            let args: IdArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let deleted = if args.cascade {
                store
                    .cascade_tombstone(&args.id, &args.reason, &actor)
                    .map_err(|e| RpcError::from(&e))?
            } else {
                store
                    .tombstone_issue(&args.id, &args.reason, &actor)
                    .map_err(|e| RpcError::from(&e))?;
                vec![args.id.clone()]
            };
            state.dirty.mark_dirty();
            Ok(json!({"deleted": deleted}))
        }

        Op::AddDependency => {
            let args: DependencyArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let dep_type = match args.dep_type.as_deref() {
                None => DependencyType::Blocks,
                Some(s) => DependencyType::parse(s).ok_or_else(|| {
                    RpcError::new("validation", format!("unknown dependency type: {s}"))
                })?,
            };
            let mut dep = Dependency::new(&args.issue_id, &args.depends_on_id, dep_type);
            dep.created_by = actor.clone();
            store
                .add_dependency(&dep, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::RemoveDependency => {
            let args: DependencyArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            store
                .remove_dependency(&args.issue_id, &args.depends_on_id, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::AddLabel => {
            let args: LabelArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            store
                .add_label(&args.id, &args.label, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::RemoveLabel => {
            let args: LabelArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            store
                .remove_label(&args.id, &args.label, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::Comment => {
            let args: CommentArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let comment = store
                .add_comment(&args.id, &actor, &args.text)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            serde_json::to_value(comment).map_err(internal)
        }

        Op::ReadyWork => {
            let args: ReadyArgs = parse_args(request.args)?;
            let filter = WorkFilter {
                assignee: args.assignee,
                limit: args.limit,
                ready_statuses: ready_statuses(state),
                ..Default::default()
            };
            let issues = store
                .get_ready_work(&filter)
                .map_err(|e| RpcError::from(&e))?;
            serde_json::to_value(issues).map_err(internal)
        }

        Op::Sync => {
            let args: SyncArgs = parse_args(request.args)?;
            let engine = SyncEngine::new(store, &state.beads_dir, state.config.clone());
            let report = engine
                .sync(&SyncOptions {
                    push: args.push,
                    pull: args.pull,
                    dry_run: args.dry_run,
                    allow_stale: args.allow_stale,
                    ..Default::default()
                })
                .map_err(|e| RpcError::new("sync_failed", e.to_string()))?;
            Ok(json!({
                "committed": report.committed,
                "pushed": report.pushed,
                "pulled": report.pulled,
                "skipped_backoff": report.skipped_backoff,
                "warnings": report.warnings,
            }))
        }

        Op::ConfigGet => {
            let args: ConfigArgs = parse_args(request.args)?;
            let value = store
                .get_config(&args.key)
                .map_err(|e| RpcError::from(&e))?;
            Ok(json!({"key": args.key, "value": value}))
        }

        Op::ConfigSet => {
            let args: ConfigArgs = parse_args(request.args)?;
            let value = args
                .value
                .ok_or_else(|| RpcError::new("validation", "config_set requires a value"))?;
            store
                .set_config(&args.key, &value)
                .map_err(|e| RpcError::from(&e))?;
            Ok(Value::Null)
        }

        Op::ConfigList => {
            let all = store.get_all_config().map_err(|e| RpcError::from(&e))?;
            serde_json::to_value(all).map_err(internal)
        }

        Op::ConfigUnset => {
            let args: ConfigArgs = parse_args(request.args)?;
            store
                .delete_config(&args.key)
                .map_err(|e| RpcError::from(&e))?;
            Ok(Value::Null)
        }

        Op::DecisionResolve => {
            let args: DecisionArgs = parse_args(request.args)?;
            let actor = state.actor_or(&args.actor).to_string();
            let issue = store
                .get_issue(&args.id)
                .map_err(|e| RpcError::from(&e))?;
            if issue.issue_type != IssueType::Gate {
                return Err(RpcError::new(
                    "validation",
                    format!("{} is not a gate issue", args.id),
                ));
            }
            // Record what resolved the awaited event, then close the gate.
            store
                .update_issue(
                    &args.id,
                    &IssueUpdates {
                        await_id: Some(args.resolution.clone()),
                        ..Default::default()
                    },
                    &actor,
                )
                .map_err(|e| RpcError::from(&e))?;
            store
                .close_issue(&args.id, &args.resolution, &actor)
                .map_err(|e| RpcError::from(&e))?;
            state.dirty.mark_dirty();
            Ok(Value::Null)
        }

        Op::Execute => {
            let args: ExecuteArgs = parse_args(request.args)?;
            match args.command.as_str() {
                "purge" => {
                    let filter: PurgeFilterArgs =
                        serde_json::from_value(args.args).unwrap_or_default();
                    let purged = store
                        .purge(&PurgeFilter {
                            id_glob: filter.id_glob,
                            older_than_days: filter.older_than_days,
                            title_pattern: filter.title_pattern,
                        })
                        .map_err(|e| RpcError::from(&e))?;
                    state.dirty.mark_dirty();
                    Ok(json!({"purged": purged}))
                }
                "expire-tombstones" => {
                    let days = state
                        .store
                        .get_config_impl("tombstone.retention_days")
                        .ok()
                        .and_then(|v| v.parse::<i64>().ok())
                        .unwrap_or(90);
                    let expired = state
                        .store
                        .expire_tombstones_impl(days)
                        .map_err(|e| RpcError::from(&e))?;
                    state.dirty.mark_dirty();
                    Ok(json!({"expired": expired}))
                }
                other => Err(RpcError::new(
                    "unknown_command",
                    format!("no handler registered for '{other}'"),
                )),
            }
        }

        Op::Shutdown => {
            state.shutdown.store(true, Ordering::Relaxed);
            Ok(Value::Null)
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct PurgeFilterArgs {
    #[serde(default)]
    id_glob: Option<String>,
    #[serde(default)]
    older_than_days: Option<i64>,
    #[serde(default)]
    title_pattern: Option<String>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, RpcError> {
    serde_json::from_value(args)
        .map_err(|e| RpcError::new("validation", format!("bad arguments: {e}")))
}

fn internal(e: serde_json::Error) -> RpcError {
    RpcError::new("internal", e.to_string())
}

/// Custom pre-in-progress statuses that count as ready, from config.
fn ready_statuses(state: &DaemonState) -> Vec<String> {
    state
        .store
        .get_config_impl("status.ready")
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Builds a new issue from create args, generating a collision-free
/// hash-based id.
fn build_issue(
    state: &DaemonState,
    store: &dyn Storage,
    args: &CreateArgs,
    actor: &str,
) -> Result<Issue, RpcError> {
    let db_config = store.get_all_config().map_err(|e| RpcError::from(&e))?;
    let prefix = resolve_value("issue-prefix", None, &db_config, &state.config)
        .unwrap_or_else(|| "bd".to_string());

    let stats = store.get_statistics().map_err(|e| RpcError::from(&e))?;
    let length =
        idgen::compute_adaptive_length(stats.total_issues as usize, idgen::MAX_COLLISION_PROB);

    // Deterministic for identical content (nonce 0); bump only on a local
    // collision so independent clones converge on the same id.
    let mut new_id = None;
    for nonce in 0..64u32 {
        let candidate =
            idgen::generate_hash_id(&prefix, &args.title, &args.description, actor, length, nonce);
        match store.get_issue_with_tombstones(&candidate) {
            Err(e) if e.is_not_found() => {
                new_id = Some(candidate);
                break;
            }
            Ok(_) => continue,
            Err(e) => return Err(RpcError::from(&e)),
        }
    }
    let new_id = new_id
        .ok_or_else(|| RpcError::new("internal", "could not find a collision-free id"))?;

    let mut builder = IssueBuilder::new(&args.title)
        .id(new_id)
        .description(&args.description)
        .design(&args.design)
        .acceptance_criteria(&args.acceptance_criteria)
        .assignee(&args.assignee)
        .created_by(actor)
        .ephemeral(args.ephemeral)
        .pinned(args.pinned);
    if let Some(ref t) = args.issue_type {
        builder = builder.issue_type(IssueType::from(t.as_str()).normalize());
    }
    if let Some(p) = args.priority {
        builder = builder.priority(p);
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (tempfile::TempDir, DaemonState) {
        let dir = tempfile::tempdir().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir(&beads).unwrap();
        let state = DaemonState {
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            config: BeadsConfig::default(),
            beads_dir: beads,
            dirty: DirtyTracker::spawn(Duration::from_secs(3600), || {}),
            started: Instant::now(),
            shutdown: AtomicBool::new(false),
        };
        (dir, state)
    }

    fn call(state: &DaemonState, op: Op, args: Value) -> Response {
        handle_request(
            state,
            Request {
                id: 1,
                op,
                args,
            },
        )
    }

    #[test]
    fn health_reports_protocol() {
        let (_dir, state) = test_state();
        let resp = call(&state, Op::Health, Value::Null);
        assert!(resp.ok);
        assert_eq!(resp.data["protocol"], PROTOCOL_VERSION);
    }

    #[test]
    fn create_show_roundtrip() {
        let (_dir, state) = test_state();
        let resp = call(
            &state,
            Op::Create,
            json!({"title": "Fix login", "priority": 1, "labels": ["auth"], "actor": "alice"}),
        );
        assert!(resp.ok, "{:?}", resp.error);
        let id = resp.data["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("bd-"));

        let shown = call(&state, Op::Show, json!({"id": id}));
        assert!(shown.ok);
        assert_eq!(shown.data["title"], "Fix login");
        assert_eq!(shown.data["labels"][0], "auth");
        assert_eq!(shown.data["created_by"], "alice");
    }

    #[test]
    fn identical_creates_get_distinct_ids_locally() {
        let (_dir, state) = test_state();
        let make = || {
            call(
                &state,
                Op::Create,
                json!({"title": "Same", "description": "Same", "actor": "alice"}),
            )
        };
        let id1 = make().data["id"].as_str().unwrap().to_string();
        let id2 = make().data["id"].as_str().unwrap().to_string();
        assert_ne!(id1, id2, "local collision must bump the nonce");
    }

    #[test]
    fn unknown_issue_is_structured_not_found() {
        let (_dir, state) = test_state();
        let resp = call(&state, Op::Show, json!({"id": "bd-nope1"}));
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "not_found");
    }

    #[test]
    fn dependency_cycle_surfaces_code() {
        let (_dir, state) = test_state();
        let a = call(&state, Op::Create, json!({"title": "A"})).data["id"]
            .as_str()
            .unwrap()
            .to_string();
        let b = call(&state, Op::Create, json!({"title": "B"})).data["id"]
            .as_str()
            .unwrap()
            .to_string();

        let ok = call(
            &state,
            Op::AddDependency,
            json!({"issue_id": a, "depends_on_id": b}),
        );
        assert!(ok.ok);

        let cycle = call(
            &state,
            Op::AddDependency,
            json!({"issue_id": b, "depends_on_id": a}),
        );
        assert!(!cycle.ok);
        assert_eq!(cycle.error.unwrap().code, "dependency_cycle");
    }

    #[test]
    fn delete_then_update_is_invalid_transition() {
        let (_dir, state) = test_state();
        let id = call(&state, Op::Create, json!({"title": "gone"})).data["id"]
            .as_str()
            .unwrap()
            .to_string();

        let del = call(&state, Op::Delete, json!({"id": id, "reason": "cleanup"}));
        assert!(del.ok);
        assert_eq!(del.data["deleted"][0], id);

        let upd = call(&state, Op::Update, json!({"id": id, "status": "open"}));
        assert!(!upd.ok);
        assert_eq!(upd.error.unwrap().code, "invalid_transition");
    }

    #[test]
    fn ready_work_over_rpc() {
        let (_dir, state) = test_state();
        let x = call(&state, Op::Create, json!({"title": "X"})).data["id"]
            .as_str()
            .unwrap()
            .to_string();
        let y = call(&state, Op::Create, json!({"title": "Y"})).data["id"]
            .as_str()
            .unwrap()
            .to_string();
        call(
            &state,
            Op::AddDependency,
            json!({"issue_id": x, "depends_on_id": y}),
        );

        let ready = call(&state, Op::ReadyWork, Value::Null);
        let ids: Vec<String> = ready.data
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec![y.clone()]);

        call(&state, Op::Close, json!({"id": y, "reason": "done"}));
        let ready = call(&state, Op::ReadyWork, Value::Null);
        let ids: Vec<String> = ready.data
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec![x]);
    }

    #[test]
    fn execute_purge_and_unknown_command() {
        let (_dir, state) = test_state();
        let resp = call(&state, Op::Execute, json!({"command": "purge"}));
        assert!(resp.ok);
        assert!(resp.data["purged"].as_array().unwrap().is_empty());

        let resp = call(&state, Op::Execute, json!({"command": "frobnicate"}));
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "unknown_command");
    }

    #[test]
    fn shutdown_sets_flag() {
        let (_dir, state) = test_state();
        let resp = call(&state, Op::Shutdown, Value::Null);
        assert!(resp.ok);
        assert!(state.shutdown.load(Ordering::Relaxed));
    }
}
