//! CLI definition for the engine's entry points.
//!
//! The full issue-management front-end lives with its own tooling; this
//! binary exposes only what the engine itself needs an executable for:
//! workspace init, the daemon, the merge driver, and sync.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Global flags shared by every command.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Actor name for the audit trail.
    #[arg(long, global = true, env = "BEADS_ACTOR")]
    pub actor: Option<String>,

    /// Path to the .beads directory (default: discovered by walking up).
    #[arg(long, global = true)]
    pub beads_dir: Option<PathBuf>,

    /// Proceed even when the database is stale relative to the manifest.
    #[arg(long, global = true)]
    pub allow_stale: bool,

    /// Block write operations.
    #[arg(long, global = true)]
    pub readonly: bool,

    /// Verbose logging to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "bd", about = "beads synchronization engine", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a .beads workspace in the current directory.
    Init(InitArgs),

    /// Daemon lifecycle.
    #[command(subcommand)]
    Daemon(DaemonCommands),

    /// Three-way merge driver for the manifest (invoked by the VCS).
    MergeDriver(MergeDriverArgs),

    /// Export, commit, push, pull, and re-import.
    Sync(SyncArgs),

    /// Export the database to the manifest.
    Export(ExportArgs),

    /// Import the manifest into the database.
    Import,

    /// Hard-delete closed ephemeral issues.
    Purge(PurgeArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Issue ID prefix for this workspace (e.g. "bd").
    #[arg(long, default_value = "bd")]
    pub prefix: String,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground.
    Run,
    /// Ask a running daemon to shut down.
    Stop,
    /// Report whether a daemon is running.
    Status,
}

#[derive(Debug, Args)]
pub struct MergeDriverArgs {
    /// Common ancestor version (%O).
    pub base: PathBuf,
    /// Our version; the merged result is written here (%A).
    pub ours: PathBuf,
    /// Their version (%B).
    pub theirs: PathBuf,
}

#[derive(Debug, Args, Default)]
pub struct SyncArgs {
    /// Fetch and re-import after exporting.
    #[arg(long)]
    pub pull: bool,

    /// Push after committing.
    #[arg(long)]
    pub push: bool,

    /// Report without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Export only; skip the sync commit.
    #[arg(long)]
    pub no_git_history: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Overwrite the manifest even if it would shrink.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Glob on issue IDs (e.g. "bd-msg-*").
    #[arg(long)]
    pub id_glob: Option<String>,

    /// Only rows untouched for this many days.
    #[arg(long)]
    pub older_than_days: Option<i64>,

    /// Substring match on titles.
    #[arg(long)]
    pub title_pattern: Option<String>,
}
