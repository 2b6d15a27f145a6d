//! Canonical form and deterministic content hashing.
//!
//! The content hash is SHA-256 over a canonical JSON rendering of the issue:
//! fields in a fixed order, stable key ordering, no insignificant
//! whitespace, UTC timestamps, free-form text trimmed of trailing
//! whitespace. `updated_at`, `semantic_slug`, and derived relational data
//! are deliberately excluded so that semantically equivalent issues from
//! different ingestion paths hash identically.

use sha2::{Digest, Sha256};

use crate::issue::Issue;
use crate::timefmt::format_ts;

/// Renders the canonical text representation of an issue.
pub fn canonical_json(issue: &Issue) -> String {
    let mut out = String::with_capacity(256);
    out.push('{');

    let mut first = true;
    let mut field = |out: &mut String, key: &str, value: String| {
        if !first {
            out.push(',');
        }
        first = false;
        out.push('"');
        out.push_str(key);
        out.push_str("\":");
        out.push_str(&value);
    };

    field(&mut out, "title", json_str(issue.title.trim_end()));
    field(&mut out, "description", json_str(issue.description.trim_end()));
    field(&mut out, "design", json_str(issue.design.trim_end()));
    field(
        &mut out,
        "acceptance_criteria",
        json_str(issue.acceptance_criteria.trim_end()),
    );
    field(&mut out, "status", json_str(issue.status.as_str()));
    field(&mut out, "priority", issue.priority.to_string());
    field(&mut out, "issue_type", json_str(issue.issue_type.as_str()));
    field(&mut out, "assignee", json_str(&issue.assignee));
    field(&mut out, "owner", json_str(&issue.owner));
    field(&mut out, "created_by", json_str(&issue.created_by));
    field(&mut out, "created_at", json_str(&format_ts(&issue.created_at)));
    field(&mut out, "closed_at", opt_ts(&issue.closed_at));
    field(&mut out, "close_reason", json_str(&issue.close_reason));
    field(&mut out, "deleted_at", opt_ts(&issue.deleted_at));
    field(&mut out, "deleted_by", json_str(&issue.deleted_by));
    field(&mut out, "delete_reason", json_str(&issue.delete_reason));
    field(
        &mut out,
        "original_type",
        match &issue.original_type {
            Some(t) => json_str(t.as_str()),
            None => "null".to_string(),
        },
    );
    field(&mut out, "ephemeral", issue.ephemeral.to_string());
    field(&mut out, "pinned", issue.pinned.to_string());
    field(
        &mut out,
        "external_ref",
        match &issue.external_ref {
            Some(r) => json_str(r),
            None => "null".to_string(),
        },
    );
    field(&mut out, "source_repo", json_str(&issue.source_repo));
    field(&mut out, "await_type", json_str(&issue.await_type));
    field(&mut out, "await_id", json_str(&issue.await_id));
    field(&mut out, "source_ref", json_str(&issue.source_ref));
    field(&mut out, "target_ref", json_str(&issue.target_ref));

    out.push('}');
    out
}

/// Computes the deterministic content hash of an issue.
pub fn compute_content_hash(issue: &Issue) -> String {
    let canonical = canonical_json(issue);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).expect("string serialisation is infallible")
}

fn opt_ts(t: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    match t {
        Some(t) => json_str(&format_ts(t)),
        None => "null".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn content_hash_deterministic() {
        let issue = IssueBuilder::new("Test issue")
            .description("A description")
            .priority(2)
            .build();

        let hash1 = compute_content_hash(&issue);
        let hash2 = compute_content_hash(&issue);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex
    }

    #[test]
    fn content_hash_differs_on_change() {
        let issue1 = IssueBuilder::new("Title A").build();
        let issue2 = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_id_updated_at_and_slug() {
        let t = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let mut issue1 = IssueBuilder::new("Same content").created_at(t).build();
        let mut issue2 = IssueBuilder::new("Same content").created_at(t).build();

        issue1.id = "bd-aaaaa".into();
        issue2.id = "bd-bbbbb".into();
        issue1.updated_at = chrono::Utc::now();
        issue2.updated_at = t;
        issue1.semantic_slug = "login-fix".into();

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn trailing_whitespace_is_insignificant() {
        let t = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let a = IssueBuilder::new("Title")
            .description("body text   ")
            .created_at(t)
            .build();
        let b = IssueBuilder::new("Title")
            .description("body text")
            .created_at(t)
            .build();
        assert_eq!(compute_content_hash(&a), compute_content_hash(&b));
    }

    #[test]
    fn canonical_form_is_compact_json() {
        let issue = IssueBuilder::new("T").build();
        let canonical = canonical_json(&issue);
        assert!(canonical.starts_with('{'));
        assert!(canonical.ends_with('}'));
        assert!(!canonical.contains('\n'));
        // Must itself be valid JSON.
        let parsed: serde_json::Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(parsed["title"], "T");
    }
}
