//! `bd` -- entry points for the beads synchronization engine: workspace
//! init, the daemon, the merge driver, and sync.

mod cli;
mod commands;
mod context;

use clap::Parser;

use cli::{Cli, Commands, DaemonCommands};
use context::RuntimeContext;

/// Exit codes per failure class.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const DATABASE: i32 = 3;
    pub const SYNC: i32 = 4;
    pub const CONFLICT: i32 = 5;
    pub const PERMISSION: i32 = 6;
    pub const READONLY: i32 = 7;
    pub const NOT_A_WORKSPACE: i32 = 8;
}

fn main() {
    let cli = Cli::parse();
    let ctx = RuntimeContext::from_global_args(&cli.global);

    let filter = if ctx.verbose { "bd=debug,beads=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init(args) => commands::init(&ctx, &args),
        Commands::Daemon(DaemonCommands::Run) => commands::daemon_run(&ctx),
        Commands::Daemon(DaemonCommands::Stop) => commands::daemon_stop(&ctx),
        Commands::Daemon(DaemonCommands::Status) => commands::daemon_status(&ctx),
        Commands::MergeDriver(args) => commands::merge_driver(&args),
        Commands::Sync(args) => commands::sync(&ctx, &args),
        Commands::Export(args) => commands::export(&ctx, &args),
        Commands::Import => commands::import(&ctx),
        Commands::Purge(args) => commands::purge(&ctx, &args),
    };

    match result {
        Ok(()) => std::process::exit(exit_codes::OK),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(classify(&e));
        }
    }
}

/// Maps an error chain onto the documented exit codes.
fn classify(e: &anyhow::Error) -> i32 {
    for cause in e.chain() {
        if let Some(cfg) = cause.downcast_ref::<beads_config::ConfigError>() {
            return match cfg {
                beads_config::ConfigError::BeadsDirNotFound => exit_codes::NOT_A_WORKSPACE,
                _ => exit_codes::CONFIG,
            };
        }
        if cause.downcast_ref::<beads_storage::StorageError>().is_some() {
            return exit_codes::DATABASE;
        }
        if let Some(sync) = cause.downcast_ref::<beads_sync::SyncError>() {
            return match sync {
                beads_sync::SyncError::Git(beads_git::GitError::PermissionDenied(_)) => {
                    exit_codes::PERMISSION
                }
                beads_sync::SyncError::StaleDatabase => exit_codes::CONFLICT,
                beads_sync::SyncError::Storage(_) => exit_codes::DATABASE,
                _ => exit_codes::SYNC,
            };
        }
        if let Some(git) = cause.downcast_ref::<beads_git::GitError>() {
            return match git {
                beads_git::GitError::PermissionDenied(_) => exit_codes::PERMISSION,
                _ => exit_codes::SYNC,
            };
        }
        if cause.to_string().contains("readonly") {
            return exit_codes::READONLY;
        }
    }
    exit_codes::GENERAL
}
