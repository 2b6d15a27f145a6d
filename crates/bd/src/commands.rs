//! Command handlers for the engine entry points.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use beads_config::{BeadsConfig, load_config, save_config};
use beads_core::filter::PurgeFilter;
use beads_daemon::{DaemonClient, Op, Server, socket_path, startup};
use beads_storage::{SqliteStore, Storage, find_database, with_retry};
use beads_sync::{SyncEngine, SyncOptions, export_to_manifest, gate_write, import_manifest};

use crate::cli::{ExportArgs, InitArgs, MergeDriverArgs, PurgeArgs, SyncArgs};
use crate::context::RuntimeContext;
use crate::exit_codes;

/// `bd init`: create `.beads/`, the database, config, gitignore, and the
/// merge-driver registration.
pub fn init(ctx: &RuntimeContext, args: &InitArgs) -> Result<()> {
    BeadsConfig::validate_prefix(&args.prefix)?;

    let cwd = std::env::current_dir()?;
    let beads_dir = beads_config::ensure_beads_dir(&cwd)?;

    let mut config = load_config(&beads_dir)?;
    config.prefix = Some(args.prefix.clone());
    save_config(&beads_dir, &config)?;

    let store = open_store(&beads_dir)?;
    store.set_config("issue-prefix", &args.prefix)?;
    beads_sync::gitignore::ensure_gitignore(&beads_dir)?;

    // Register the merge driver so manifest merges resolve automatically.
    if let Some(repo) = beads_git::find_git_root(&cwd) {
        beads_git::driver::register_merge_driver(&repo, "bd")?;
        beads_git::driver::ensure_gitattributes(&repo)?;
    }

    println!("initialized beads workspace at {}", beads_dir.display());
    println!("issue prefix: {}", args.prefix);
    let _ = ctx;
    Ok(())
}

/// `bd daemon run`: the startup protocol, signal wiring, and the serve
/// loop, with a crash report on panic.
pub fn daemon_run(ctx: &RuntimeContext) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?.clone();

    let daemon_ctx = startup(&beads_dir)?;
    let (server, _guard) = Server::bind(daemon_ctx)?;
    let state = server.state();

    // First signal drains gracefully; a second one force-exits.
    let signal_state = state.clone();
    ctrlc::set_handler(move || {
        if signal_state
            .shutdown
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            std::process::exit(exit_codes::GENERAL);
        }
    })
    .context("failed to install signal handler")?;

    let crash_dir = beads_dir.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| server.run()));
    match result {
        Ok(run_result) => Ok(run_result?),
        Err(panic) => {
            let payload = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let report = beads_daemon::write_crash_report(&crash_dir, &payload);
            // Release the socket so the stale-socket detector has less to do.
            let _ = std::fs::remove_file(socket_path(&beads_dir));
            bail!("daemon panicked; crash report at {}", report.display());
        }
    }
}

/// `bd daemon stop`: connect and ask for shutdown.
pub fn daemon_stop(ctx: &RuntimeContext) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    let mut client = DaemonClient::connect(&socket_path(beads_dir))?;
    client.shutdown()?;
    println!("daemon stopping");
    Ok(())
}

/// `bd daemon status`: handshake and print health.
pub fn daemon_status(ctx: &RuntimeContext) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    match DaemonClient::connect(&socket_path(beads_dir)) {
        Ok(mut client) => {
            let health = client.call(Op::Health, serde_json::Value::Null)?;
            println!(
                "daemon running (version {}, up {}s)",
                health["version"].as_str().unwrap_or("?"),
                health["uptime_secs"].as_u64().unwrap_or(0)
            );
        }
        Err(_) => println!("daemon not running"),
    }
    Ok(())
}

/// `bd merge-driver <base> <ours> <theirs>`: invoked by the VCS. Always
/// merges; warnings go to stderr; lossy merges still exit 0.
pub fn merge_driver(args: &MergeDriverArgs) -> Result<()> {
    let result = beads_merge::merge_files(&args.base, &args.ours, &args.theirs, &args.ours)?;
    for warning in &result.warnings {
        eprintln!("bd merge-driver: {warning}");
    }
    info!(
        issues = result.issues.len(),
        lossy = result.lossy,
        "manifest merged"
    );
    Ok(())
}

/// `bd sync`.
pub fn sync(ctx: &RuntimeContext, args: &SyncArgs) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    if ctx.readonly && !args.dry_run {
        bail!("workspace is readonly");
    }

    let store = open_store(beads_dir)?;
    let config = load_config(beads_dir)?;
    let engine = SyncEngine::new(&store, beads_dir, config);
    let report = engine.sync(&SyncOptions {
        pull: args.pull,
        push: args.push,
        dry_run: args.dry_run,
        no_git_history: args.no_git_history,
        allow_stale: ctx.allow_stale,
        ..Default::default()
    })?;

    if report.skipped_backoff {
        println!("sync suppressed: backing off after repeated failures");
    }
    if let Some(imported) = &report.imported {
        println!(
            "imported: {} created, {} updated, {} unchanged",
            imported.created, imported.updated, imported.unchanged
        );
    }
    if let Some(exported) = &report.exported {
        println!("exported: {exported:?}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `bd export`.
pub fn export(ctx: &RuntimeContext, args: &ExportArgs) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    let store = open_store(beads_dir)?;

    if !args.force {
        gate_write(&store, &beads_config::manifest_path(beads_dir), ctx.allow_stale)?;
    }
    let outcome = export_to_manifest(&store, beads_dir, args.force)?;
    println!("export: {outcome:?}");
    Ok(())
}

/// `bd import`.
pub fn import(ctx: &RuntimeContext) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    let store = open_store(beads_dir)?;
    let outcome = import_manifest(&store, beads_dir)?;
    println!(
        "imported: {} created, {} updated, {} unchanged, {} skipped",
        outcome.created, outcome.updated, outcome.unchanged, outcome.skipped
    );
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `bd purge`.
pub fn purge(ctx: &RuntimeContext, args: &PurgeArgs) -> Result<()> {
    let beads_dir = ctx.require_beads_dir()?;
    if ctx.readonly {
        bail!("workspace is readonly");
    }
    let store = open_store(beads_dir)?;
    let purged = store.purge(&PurgeFilter {
        id_glob: args.id_glob.clone(),
        older_than_days: args.older_than_days,
        title_pattern: args.title_pattern.clone(),
    })?;
    println!("purged {} issues", purged.len());
    for id in purged {
        println!("  {id}");
    }
    Ok(())
}

fn open_store(beads_dir: &Path) -> Result<SqliteStore> {
    let db_path = find_database(beads_dir)?;
    // Another process may hold the database briefly; retry before surfacing.
    Ok(with_retry(|| SqliteStore::open(&db_path))?)
}
