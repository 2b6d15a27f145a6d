//! Manifest import: reconcile `.beads/issues.jsonl` into the database.
//!
//! Imports are upserts resolved per issue: tombstones win, otherwise the
//! newer `updated_at` does. Rows are written exactly as they appear in the
//! manifest so a subsequent export is byte-identical. The legacy
//! `deletions.jsonl` side file is migrated into inline tombstones on first
//! contact and archived.

use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use beads_config::{DELETIONS_NAME, manifest_path};
use beads_core::content_hash::canonical_json;
use beads_core::issue::Issue;
use beads_core::jsonl;
use beads_core::timefmt;
use beads_storage::Storage;
use beads_storage::sqlite::schema::meta_keys;

use crate::Result;

/// Counters and warnings from one import pass.
#[derive(Debug, Default, Clone)]
pub struct ImportOutcome {
    /// Issues newly inserted.
    pub created: usize,
    /// Issues replaced by a newer incoming copy.
    pub updated: usize,
    /// Issues left alone because the local copy was identical.
    pub unchanged: usize,
    /// Incoming copies dropped because the local copy was newer or a
    /// protected tombstone.
    pub skipped: usize,
    /// Legacy deletion entries migrated to inline tombstones.
    pub migrated_deletions: usize,
    /// Per-line and per-issue warnings, delivered to the client.
    pub warnings: Vec<String>,
}

/// One entry of the legacy deletions side file.
#[derive(Debug, Deserialize)]
struct LegacyDeletion {
    id: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    actor: String,
}

/// Imports the manifest into the store.
pub fn import_manifest(store: &dyn Storage, beads_dir: &Path) -> Result<ImportOutcome> {
    let mut outcome = ImportOutcome::default();

    migrate_legacy_deletions(store, beads_dir, &mut outcome)?;

    let path = manifest_path(beads_dir);
    if !path.exists() {
        return Ok(outcome);
    }

    let file = std::fs::File::open(&path)?;
    let (issues, parse_warnings) = jsonl::read_jsonl_lenient(BufReader::new(file))?;
    for w in &parse_warnings {
        warn!("{w}");
        outcome.warnings.push(w.to_string());
    }

    // Decide per issue up front, against the hydrated local copy.
    let mut to_apply: Vec<&Issue> = Vec::new();
    for incoming in &issues {
        if incoming.id.is_empty() {
            outcome.warnings.push("skipped manifest line without id".into());
            continue;
        }
        match store.get_issue_with_tombstones(&incoming.id) {
            Ok(mut existing) => {
                existing.labels = store.get_labels(&existing.id)?;
                existing.dependencies = store.get_dependency_records(&existing.id)?;
                match decide_upsert(&existing, incoming) {
                    UpsertDecision::Replace => {
                        outcome.updated += 1;
                        to_apply.push(incoming);
                    }
                    UpsertDecision::Unchanged => outcome.unchanged += 1,
                    UpsertDecision::KeepLocal(why) => {
                        outcome.skipped += 1;
                        outcome.warnings.push(format!(
                            "{}: dropped incoming change ({why})",
                            incoming.id
                        ));
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                outcome.created += 1;
                to_apply.push(incoming);
            }
            Err(e) => return Err(e.into()),
        }
    }

    store.run_in_transaction(&|tx| {
        // First pass: issue rows. Edges come second so both endpoints exist.
        for incoming in &to_apply {
            tx.import_issue(incoming)?;
            tx.replace_labels(&incoming.id, &incoming.labels)?;
        }
        for incoming in &to_apply {
            tx.replace_dependencies(&incoming.id, &incoming.dependencies)?;
            let existing: Vec<_> = tx
                .get_comments(&incoming.id)?
                .into_iter()
                .map(|c| (c.created_at, c.author, c.text))
                .collect();
            for comment in &incoming.comments {
                let key = (
                    comment.created_at,
                    comment.author.clone(),
                    comment.text.clone(),
                );
                if !existing.contains(&key) {
                    tx.import_comment(
                        &incoming.id,
                        &comment.author,
                        &comment.text,
                        comment.created_at,
                    )?;
                }
            }
        }
        Ok(())
    })?;

    store.set_metadata(
        meta_keys::LAST_IMPORT_AT,
        &timefmt::format_ts(&chrono::Utc::now()),
    )?;

    info!(
        created = outcome.created,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        skipped = outcome.skipped,
        "imported manifest"
    );
    Ok(outcome)
}

/// What to do with one incoming issue that already exists locally.
#[derive(Debug, PartialEq, Eq)]
enum UpsertDecision {
    Replace,
    Unchanged,
    /// Local copy wins; the string names why (for the warning).
    KeepLocal(&'static str),
}

/// Resolves one incoming issue against the local copy.
///
/// Tombstone rules first: a local tombstone is never resurrected by a
/// non-tombstone import, and an incoming tombstone always lands. Otherwise
/// last-writer-wins on `updated_at`, incoming on ties (the manifest is the
/// merged truth).
fn decide_upsert(existing: &Issue, incoming: &Issue) -> UpsertDecision {
    match (existing.is_tombstone(), incoming.is_tombstone()) {
        (true, false) => return UpsertDecision::KeepLocal("tombstone wins"),
        (false, true) => return UpsertDecision::Replace,
        _ => {}
    }

    let same_content = canonical_json(existing) == canonical_json(incoming)
        && existing.updated_at == incoming.updated_at
        && sorted(&existing.labels) == sorted(&incoming.labels)
        && existing.dependencies.len() == incoming.dependencies.len();
    if same_content {
        return UpsertDecision::Unchanged;
    }

    if incoming.updated_at >= existing.updated_at {
        UpsertDecision::Replace
    } else {
        UpsertDecision::KeepLocal("local copy is newer")
    }
}

fn sorted(v: &[String]) -> Vec<&String> {
    let mut out: Vec<&String> = v.iter().collect();
    out.sort();
    out
}

/// Migrates the legacy deletions side file into inline tombstones, then
/// archives it as `deletions.jsonl.migrated`. Inline tombstones are
/// authoritative: entries whose issue is already tombstoned are ignored.
fn migrate_legacy_deletions(
    store: &dyn Storage,
    beads_dir: &Path,
    outcome: &mut ImportOutcome,
) -> Result<()> {
    let path = beads_dir.join(DELETIONS_NAME);
    if !path.exists() {
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)?;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: LegacyDeletion = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                outcome
                    .warnings
                    .push(format!("deletions.jsonl line {}: {e}", lineno + 1));
                continue;
            }
        };

        match store.get_issue_with_tombstones(&entry.id) {
            Ok(existing) if existing.is_tombstone() => {} // already authoritative
            Ok(_) => {
                let actor = if entry.actor.is_empty() {
                    "legacy-migration"
                } else {
                    &entry.actor
                };
                store.tombstone_issue(&entry.id, &entry.reason, actor)?;
                outcome.migrated_deletions += 1;
            }
            Err(e) if e.is_not_found() => {
                // Nothing local to tombstone; the inline manifest (merged
                // elsewhere) is authoritative for unknown ids.
            }
            Err(e) => return Err(e.into()),
        }
    }

    let archived = path.with_extension("jsonl.migrated");
    std::fs::rename(&path, &archived)?;
    info!(
        migrated = outcome.migrated_deletions,
        archive = %archived.display(),
        "migrated legacy deletions manifest"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_to_manifest;
    use beads_core::enums::Status;
    use beads_core::issue::IssueBuilder;
    use beads_storage::{IssueUpdates, SqliteStore};

    fn create(store: &SqliteStore, id: &str, title: &str) {
        store
            .create_issue_impl(&IssueBuilder::new(title).id(id).build(), "a")
            .unwrap();
    }

    #[test]
    fn fresh_clone_imports_everything() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            create(&source, &format!("bd-s{i}{i}{i}{i}"), &format!("issue {i}"));
        }
        source.add_label_impl("bd-s0000", "core", "a").unwrap();
        export_to_manifest(&source, dir.path(), false).unwrap();

        let clone = SqliteStore::open_in_memory().unwrap();
        let outcome = import_manifest(&clone, dir.path()).unwrap();
        assert!(outcome.warnings.is_empty());

        let all = clone
            .search_issues_impl("", &beads_core::filter::IssueFilter::everything())
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(clone.get_labels_impl("bd-s0000").unwrap(), vec!["core"]);

        // The manifest itself must be untouched by the import.
        let exported = crate::export::manifest_bytes(&clone).unwrap();
        let on_disk = std::fs::read(dir.path().join("issues.jsonl")).unwrap();
        assert_eq!(exported, on_disk, "import(export(x)) must reproduce the manifest");
    }

    #[test]
    fn reimport_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteStore::open_in_memory().unwrap();
        create(&source, "bd-aa111", "stable");
        export_to_manifest(&source, dir.path(), false).unwrap();

        let clone = SqliteStore::open_in_memory().unwrap();
        import_manifest(&clone, dir.path()).unwrap();
        let first = crate::export::manifest_bytes(&clone).unwrap();

        import_manifest(&clone, dir.path()).unwrap();
        let second = crate::export::manifest_bytes(&clone).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn incoming_tombstone_wins() {
        let dir = tempfile::tempdir().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        create(&remote, "bd-aa111", "doomed");
        remote.tombstone_issue_impl("bd-aa111", "obsolete", "remote").unwrap();
        export_to_manifest(&remote, dir.path(), false).unwrap();

        let local = SqliteStore::open_in_memory().unwrap();
        create(&local, "bd-aa111", "doomed");
        // Local keeps editing, unaware of the deletion.
        local
            .update_issue_impl(
                "bd-aa111",
                &IssueUpdates {
                    title: Some("new title".into()),
                    ..Default::default()
                },
                "local",
            )
            .unwrap();

        import_manifest(&local, dir.path()).unwrap();
        let t = local.get_issue_with_tombstones_impl("bd-aa111").unwrap();
        assert!(t.is_tombstone());
        assert_eq!(t.deleted_by, "remote");
    }

    #[test]
    fn local_tombstone_not_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        create(&remote, "bd-aa111", "stale copy");
        export_to_manifest(&remote, dir.path(), false).unwrap();

        let local = SqliteStore::open_in_memory().unwrap();
        create(&local, "bd-aa111", "stale copy");
        local.tombstone_issue_impl("bd-aa111", "deleted here", "local").unwrap();

        let outcome = import_manifest(&local, dir.path()).unwrap();
        let t = local.get_issue_with_tombstones_impl("bd-aa111").unwrap();
        assert!(t.is_tombstone(), "a stale manifest must not revive a tombstone");
        assert!(outcome.warnings.iter().any(|w| w.contains("bd-aa111")));
    }

    #[test]
    fn older_incoming_copy_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let remote = SqliteStore::open_in_memory().unwrap();
        create(&remote, "bd-aa111", "old title");
        export_to_manifest(&remote, dir.path(), false).unwrap();

        // Local has a strictly newer update.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let local = SqliteStore::open_in_memory().unwrap();
        create(&local, "bd-aa111", "old title");
        local
            .update_issue_impl(
                "bd-aa111",
                &IssueUpdates {
                    title: Some("newer local title".into()),
                    ..Default::default()
                },
                "local",
            )
            .unwrap();

        import_manifest(&local, dir.path()).unwrap();
        let issue = local.get_issue_impl("bd-aa111").unwrap();
        assert_eq!(issue.title, "newer local title");
    }

    #[test]
    fn legacy_deletions_migrated_and_archived() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        create(&store, "bd-aa111", "to delete");
        create(&store, "bd-bb111", "already gone");
        store.tombstone_issue_impl("bd-bb111", "inline", "a").unwrap();

        std::fs::write(
            dir.path().join(DELETIONS_NAME),
            concat!(
                "{\"id\":\"bd-aa111\",\"reason\":\"legacy cleanup\",\"actor\":\"old-tool\"}\n",
                "{\"id\":\"bd-bb111\",\"reason\":\"should be ignored\"}\n",
                "{\"id\":\"bd-gone1\"}\n",
            ),
        )
        .unwrap();

        let outcome = import_manifest(&store, dir.path()).unwrap();
        assert_eq!(outcome.migrated_deletions, 1);

        let t = store.get_issue_with_tombstones_impl("bd-aa111").unwrap();
        assert!(t.is_tombstone());
        assert_eq!(t.delete_reason, "legacy cleanup");

        // Inline tombstone stays authoritative.
        let b = store.get_issue_with_tombstones_impl("bd-bb111").unwrap();
        assert_eq!(b.delete_reason, "inline");

        assert!(!dir.path().join(DELETIONS_NAME).exists());
        assert!(dir.path().join("deletions.jsonl.migrated").exists());
    }

    #[test]
    fn concurrent_identical_create_deduplicates() {
        let dir = tempfile::tempdir().unwrap();

        // Two clones created the same logical issue offline: same content,
        // same hash-based id.
        let t = chrono::DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let make = || {
            IssueBuilder::new("Fix login")
                .id("bd-fix11")
                .created_at(t)
                .updated_at(t)
                .created_by("agent")
                .build()
        };

        let a = SqliteStore::open_in_memory().unwrap();
        a.create_issue_impl(&make(), "agent").unwrap();
        export_to_manifest(&a, dir.path(), false).unwrap();

        let b = SqliteStore::open_in_memory().unwrap();
        b.create_issue_impl(&make(), "agent").unwrap();

        import_manifest(&b, dir.path()).unwrap();
        let all = b
            .search_issues_impl("", &beads_core::filter::IssueFilter::everything())
            .unwrap();
        assert_eq!(all.len(), 1, "one copy survives the merge");
        assert_eq!(all[0].status, Status::Open);
    }
}
