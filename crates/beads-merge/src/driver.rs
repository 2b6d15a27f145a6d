//! Three-way merge of JSONL manifests.
//!
//! Invoked by the VCS when a pull or merge produces conflicting edits on
//! the manifest. The driver always terminates with a merged file: scalar
//! conflicts resolve by last-writer-wins on `updated_at` (ours on an exact
//! tie), a tombstone on either side wins over concurrent edits, and
//! set-valued fields merge additions while letting explicit removals win.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use beads_core::comment::Comment;
use beads_core::content_hash::canonical_json;
use beads_core::dependency::Dependency;
use beads_core::issue::Issue;

/// A non-fatal resolution note. The merge still completes.
#[derive(Debug, Clone)]
pub struct MergeWarning {
    /// The issue the warning concerns.
    pub id: String,
    /// Human-readable description of what was dropped or overridden.
    pub message: String,
}

impl std::fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Outcome of a three-way merge.
#[derive(Debug)]
pub struct MergeResult {
    /// Merged issues, ordered by id (the manifest's canonical order).
    pub issues: Vec<Issue>,
    /// Resolution notes for the user.
    pub warnings: Vec<MergeWarning>,
    /// `true` if any resolution dropped data (both sides changed the same
    /// scalar, or edits lost against a tombstone).
    pub lossy: bool,
}

/// Which side a conflicting scalar resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Ours,
    Theirs,
}

/// Merges three manifest states keyed by issue id.
pub fn merge_issues(base: Vec<Issue>, ours: Vec<Issue>, theirs: Vec<Issue>) -> MergeResult {
    let base = index_by_id(base);
    let ours = index_by_id(ours);
    let theirs = index_by_id(theirs);

    let mut ids: BTreeSet<String> = BTreeSet::new();
    ids.extend(base.keys().cloned());
    ids.extend(ours.keys().cloned());
    ids.extend(theirs.keys().cloned());

    let mut result = Vec::new();
    let mut warnings = Vec::new();
    let mut lossy = false;

    for id in ids {
        let b = base.get(&id);
        let o = ours.get(&id);
        let t = theirs.get(&id);

        let merged = match (b, o, t) {
            // Gone from both sides (purged everywhere).
            (_, None, None) => None,

            // Insert on one side only.
            (None, Some(o), None) => Some(o.clone()),
            (None, None, Some(t)) => Some(t.clone()),

            // Present in base, deleted on one side.
            (Some(b), Some(o), None) => resolve_one_sided_removal(b, o, &mut warnings),
            (Some(b), None, Some(t)) => resolve_one_sided_removal(b, t, &mut warnings),

            // Concurrent insert.
            (None, Some(o), Some(t)) => {
                if issues_equivalent(o, t) {
                    Some(o.clone())
                } else {
                    Some(merge_one(None, o, t, &mut warnings, &mut lossy))
                }
            }

            // Present everywhere.
            (Some(b), Some(o), Some(t)) => {
                if issues_equivalent(o, t) {
                    Some(o.clone())
                } else if issues_equivalent(o, b) {
                    Some(t.clone())
                } else if issues_equivalent(t, b) {
                    Some(o.clone())
                } else {
                    Some(merge_one(Some(b), o, t, &mut warnings, &mut lossy))
                }
            }
        };

        if let Some(issue) = merged {
            result.push(issue);
        }
    }

    MergeResult {
        issues: result,
        warnings,
        lossy,
    }
}

/// Base had the issue; one side removed it entirely (a purge). The removal
/// stands unless the surviving side changed the issue, in which case the
/// edit is preserved.
fn resolve_one_sided_removal(
    base: &Issue,
    survivor: &Issue,
    warnings: &mut Vec<MergeWarning>,
) -> Option<Issue> {
    if issues_equivalent(base, survivor) {
        None
    } else {
        warnings.push(MergeWarning {
            id: survivor.id.clone(),
            message: "removed on one side but edited on the other; keeping the edit".into(),
        });
        Some(survivor.clone())
    }
}

/// Merges a single issue present (and different) on both sides.
fn merge_one(
    base: Option<&Issue>,
    ours: &Issue,
    theirs: &Issue,
    warnings: &mut Vec<MergeWarning>,
    lossy: &mut bool,
) -> Issue {
    // Tombstone wins. Stale clones cannot revive a deleted issue by
    // re-exporting an older copy.
    match (ours.is_tombstone(), theirs.is_tombstone()) {
        (true, false) => {
            let dropped = changed_fields(base, theirs);
            if !dropped.is_empty() {
                warnings.push(MergeWarning {
                    id: ours.id.clone(),
                    message: format!(
                        "tombstone wins; dropped concurrent update to {}",
                        dropped.join(", ")
                    ),
                });
                *lossy = true;
            }
            return ours.clone();
        }
        (false, true) => {
            let dropped = changed_fields(base, ours);
            if !dropped.is_empty() {
                warnings.push(MergeWarning {
                    id: theirs.id.clone(),
                    message: format!(
                        "tombstone wins; dropped concurrent update to {}",
                        dropped.join(", ")
                    ),
                });
                *lossy = true;
            }
            return theirs.clone();
        }
        _ => {}
    }

    // Conflicting scalars all resolve to the same side: last writer wins on
    // updated_at, ours on an exact tie.
    let winner = if theirs.updated_at > ours.updated_at {
        Side::Theirs
    } else {
        Side::Ours
    };

    let mut out = ours.clone();
    let mut conflicted: Vec<&'static str> = Vec::new();

    macro_rules! scalar {
        ($field:ident) => {
            merge_scalar(
                base.map(|b| &b.$field),
                &ours.$field,
                &theirs.$field,
                &mut out.$field,
                winner,
                stringify!($field),
                &mut conflicted,
            );
        };
    }

    scalar!(title);
    scalar!(description);
    scalar!(design);
    scalar!(acceptance_criteria);
    scalar!(status);
    scalar!(priority);
    scalar!(issue_type);
    scalar!(assignee);
    scalar!(owner);
    scalar!(created_by);
    scalar!(closed_at);
    scalar!(close_reason);
    scalar!(deleted_at);
    scalar!(deleted_by);
    scalar!(delete_reason);
    scalar!(original_type);
    scalar!(ephemeral);
    scalar!(pinned);
    scalar!(external_ref);
    scalar!(source_repo);
    scalar!(await_type);
    scalar!(await_id);
    scalar!(source_ref);
    scalar!(target_ref);
    scalar!(semantic_slug);

    // Provenance: earliest creation, latest update.
    out.created_at = ours.created_at.min(theirs.created_at);
    out.updated_at = ours.updated_at.max(theirs.updated_at);

    // Set-valued fields: union of additions, removals win.
    out.labels = merge_label_sets(
        base.map(|b| b.labels.as_slice()),
        &ours.labels,
        &theirs.labels,
    );
    out.dependencies = merge_dependency_sets(
        base.map(|b| b.dependencies.as_slice()),
        &ours.dependencies,
        &theirs.dependencies,
    );
    out.comments = merge_comments(&ours.comments, &theirs.comments);

    if !conflicted.is_empty() {
        warnings.push(MergeWarning {
            id: out.id.clone(),
            message: format!(
                "both sides changed {}; kept the {} copy (newer updated_at)",
                conflicted.join(", "),
                match winner {
                    Side::Ours => "local",
                    Side::Theirs => "incoming",
                }
            ),
        });
        *lossy = true;
    }

    out
}

/// Per-scalar three-way rule: a side that matches base yields to the other;
/// a true conflict resolves to the pre-selected winner.
fn merge_scalar<T: Clone + PartialEq>(
    base: Option<&T>,
    ours: &T,
    theirs: &T,
    out: &mut T,
    winner: Side,
    name: &'static str,
    conflicted: &mut Vec<&'static str>,
) {
    if ours == theirs {
        *out = ours.clone();
        return;
    }
    match base {
        Some(b) if ours == b => *out = theirs.clone(),
        Some(b) if theirs == b => *out = ours.clone(),
        _ => {
            // Both changed (or no base) and they disagree.
            *out = match winner {
                Side::Ours => ours.clone(),
                Side::Theirs => theirs.clone(),
            };
            conflicted.push(name);
        }
    }
}

/// (base ∪ additions) minus any removal observed on either side.
fn merge_label_sets(base: Option<&[String]>, ours: &[String], theirs: &[String]) -> Vec<String> {
    let base: BTreeSet<&String> = base.unwrap_or_default().iter().collect();
    let ours: BTreeSet<&String> = ours.iter().collect();
    let theirs: BTreeSet<&String> = theirs.iter().collect();

    let mut merged: BTreeSet<&String> = BTreeSet::new();
    merged.extend(base.iter().copied());
    merged.extend(ours.difference(&base).copied());
    merged.extend(theirs.difference(&base).copied());

    // Removals win over concurrent additions.
    for removed in base.difference(&ours) {
        merged.remove(*removed);
    }
    for removed in base.difference(&theirs) {
        merged.remove(*removed);
    }

    merged.into_iter().cloned().collect()
}

/// Dependency edges merge like labels, keyed by (target, type).
fn merge_dependency_sets(
    base: Option<&[Dependency]>,
    ours: &[Dependency],
    theirs: &[Dependency],
) -> Vec<Dependency> {
    let key = |d: &Dependency| (d.depends_on_id.clone(), d.dep_type.as_str());

    let base_map: BTreeMap<_, &Dependency> =
        base.unwrap_or_default().iter().map(|d| (key(d), d)).collect();
    let ours_map: BTreeMap<_, &Dependency> = ours.iter().map(|d| (key(d), d)).collect();
    let theirs_map: BTreeMap<_, &Dependency> = theirs.iter().map(|d| (key(d), d)).collect();

    let mut merged: BTreeMap<_, &Dependency> = BTreeMap::new();
    for (k, d) in &base_map {
        merged.insert(k.clone(), *d);
    }
    for (k, d) in &ours_map {
        if !base_map.contains_key(k) {
            merged.insert(k.clone(), *d);
        }
    }
    for (k, d) in &theirs_map {
        if !base_map.contains_key(k) {
            merged.insert(k.clone(), *d);
        }
    }
    for k in base_map.keys() {
        if !ours_map.contains_key(k) || !theirs_map.contains_key(k) {
            merged.remove(k);
        }
    }

    merged.into_values().cloned().collect()
}

/// Comments are append-only: union keyed by (author, timestamp, text).
fn merge_comments(ours: &[Comment], theirs: &[Comment]) -> Vec<Comment> {
    let key = |c: &Comment| (c.created_at, c.author.clone(), c.text.clone());
    let mut merged: BTreeMap<(DateTime<Utc>, String, String), Comment> = BTreeMap::new();
    for c in ours.iter().chain(theirs.iter()) {
        merged.entry(key(c)).or_insert_with(|| c.clone());
    }
    merged.into_values().collect()
}

/// Field-for-field equivalence over the canonical form plus relational data.
fn issues_equivalent(a: &Issue, b: &Issue) -> bool {
    canonical_json(a) == canonical_json(b)
        && sorted(&a.labels) == sorted(&b.labels)
        && dependency_keys(&a.dependencies) == dependency_keys(&b.dependencies)
        && a.comments.len() == b.comments.len()
}

fn sorted(v: &[String]) -> Vec<&String> {
    let mut out: Vec<&String> = v.iter().collect();
    out.sort();
    out
}

fn dependency_keys(deps: &[Dependency]) -> BTreeSet<(String, &'static str)> {
    deps.iter()
        .map(|d| (d.depends_on_id.clone(), d.dep_type.as_str()))
        .collect()
}

/// Scalar fields of `side` that differ from base, by name. Used to tell the
/// user what a tombstone overrode.
fn changed_fields(base: Option<&Issue>, side: &Issue) -> Vec<&'static str> {
    let Some(base) = base else {
        return vec!["(new issue)"];
    };
    let mut changed = Vec::new();

    macro_rules! diff {
        ($field:ident) => {
            if base.$field != side.$field {
                changed.push(stringify!($field));
            }
        };
    }

    diff!(title);
    diff!(description);
    diff!(design);
    diff!(acceptance_criteria);
    diff!(status);
    diff!(priority);
    diff!(issue_type);
    diff!(assignee);
    diff!(owner);
    diff!(external_ref);
    diff!(semantic_slug);

    changed
}

fn index_by_id(issues: Vec<Issue>) -> BTreeMap<String, Issue> {
    issues.into_iter().map(|i| (i.id.clone(), i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::enums::{DependencyType, Status};
    use beads_core::issue::IssueBuilder;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn issue(id: &str, title: &str) -> Issue {
        IssueBuilder::new(title)
            .id(id)
            .created_at(ts(0))
            .updated_at(ts(1))
            .build()
    }

    #[test]
    fn ours_equals_base_takes_theirs() {
        let b = issue("bd-a1111", "original");
        let o = b.clone();
        let mut t = b.clone();
        t.title = "renamed".into();
        t.updated_at = ts(2);

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].title, "renamed");
        assert!(!result.lossy);
    }

    #[test]
    fn theirs_equals_base_takes_ours() {
        let b = issue("bd-a1111", "original");
        let mut o = b.clone();
        o.title = "renamed".into();
        o.updated_at = ts(2);
        let t = b.clone();

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues[0].title, "renamed");
        assert!(!result.lossy);
    }

    #[test]
    fn identical_sides_take_ours() {
        let b = issue("bd-a1111", "original");
        let mut o = b.clone();
        o.title = "same change".into();
        let t = o.clone();

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues[0].title, "same change");
        assert!(!result.lossy);
    }

    #[test]
    fn concurrent_insert_identical_takes_one() {
        let o = issue("bd-new11", "Fix login");
        let t = issue("bd-new11", "Fix login");

        let result = merge_issues(vec![], vec![o], vec![t]);
        assert_eq!(result.issues.len(), 1);
        assert!(!result.lossy);
    }

    #[test]
    fn scalar_conflict_last_writer_wins() {
        let b = issue("bd-a1111", "original");
        let mut o = b.clone();
        o.title = "ours".into();
        o.updated_at = ts(2);
        let mut t = b.clone();
        t.title = "theirs".into();
        t.updated_at = ts(3);

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues[0].title, "theirs");
        assert_eq!(result.issues[0].updated_at, ts(3));
        assert!(result.lossy);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn scalar_conflict_tie_takes_ours() {
        let b = issue("bd-a1111", "original");
        let mut o = b.clone();
        o.title = "ours".into();
        o.updated_at = ts(2);
        let mut t = b.clone();
        t.title = "theirs".into();
        t.updated_at = ts(2);

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues[0].title, "ours");
    }

    #[test]
    fn tombstone_wins_over_update() {
        let b = issue("bd-a1111", "doomed");
        let mut o = b.clone();
        o.tombstone("obsolete", "alice", ts(2));
        let mut t = b.clone();
        t.title = "late rename".into();
        t.updated_at = ts(5); // newer than the tombstone

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert!(result.issues[0].is_tombstone());
        assert!(result.lossy);
        // The dropped change is named in the warning.
        assert!(result.warnings[0].message.contains("title"));
    }

    #[test]
    fn tombstone_wins_symmetric() {
        let b = issue("bd-a1111", "doomed");
        let mut o = b.clone();
        o.title = "late rename".into();
        o.updated_at = ts(5);
        let mut t = b.clone();
        t.tombstone("obsolete", "bob", ts(2));

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert!(result.issues[0].is_tombstone());
        assert_eq!(result.issues[0].deleted_by, "bob");
    }

    #[test]
    fn label_removals_win_over_concurrent_additions() {
        let mut b = issue("bd-a1111", "labelled");
        b.labels = vec!["keep".into(), "drop".into()];
        let mut o = b.clone();
        o.labels = vec!["keep".into()]; // removed "drop"
        let mut t = b.clone();
        t.labels = vec!["keep".into(), "drop".into(), "new".into()]; // added "new"

        let result = merge_issues(vec![b], vec![o], vec![t]);
        assert_eq!(result.issues[0].labels, vec!["keep", "new"]);
    }

    #[test]
    fn dependency_sets_union_and_remove() {
        let mut b = issue("bd-a1111", "deps");
        b.dependencies = vec![Dependency::new("bd-a1111", "bd-old11", DependencyType::Blocks)];
        let mut o = b.clone();
        o.dependencies = vec![
            Dependency::new("bd-a1111", "bd-old11", DependencyType::Blocks),
            Dependency::new("bd-a1111", "bd-new11", DependencyType::Related),
        ];
        let mut t = b.clone();
        t.dependencies = vec![]; // removed the old edge

        let result = merge_issues(vec![b], vec![o], vec![t]);
        let keys = dependency_keys(&result.issues[0].dependencies);
        assert!(keys.contains(&("bd-new11".to_string(), "related")));
        assert!(!keys.contains(&("bd-old11".to_string(), "blocks")));
    }

    #[test]
    fn output_sorted_by_id() {
        let o = vec![issue("bd-zzz11", "z"), issue("bd-aaa11", "a")];
        let result = merge_issues(vec![], o, vec![]);
        let ids: Vec<&str> = result.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-aaa11", "bd-zzz11"]);
    }

    #[test]
    fn one_sided_purge_stands_when_unchanged() {
        let b = issue("bd-a1111", "purged");
        let t = b.clone();
        let result = merge_issues(vec![b], vec![], vec![t]);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn one_sided_purge_yields_to_edit() {
        let b = issue("bd-a1111", "purged");
        let mut t = b.clone();
        t.title = "edited after purge".into();
        t.updated_at = ts(3);

        let result = merge_issues(vec![b], vec![], vec![t]);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].title, "edited after purge");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn status_change_vs_content_change_merges_cleanly() {
        let b = issue("bd-a1111", "both");
        let mut o = b.clone();
        o.status = Status::InProgress;
        o.updated_at = ts(2);
        let mut t = b.clone();
        t.description = "more detail".into();
        t.updated_at = ts(3);

        let result = merge_issues(vec![b], vec![o], vec![t]);
        let merged = &result.issues[0];
        assert_eq!(merged.status, Status::InProgress);
        assert_eq!(merged.description, "more detail");
        assert!(!result.lossy);
    }
}
