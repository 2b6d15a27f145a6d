//! Validation rules: field bounds and the status transition lattice.

use crate::enums::Status;
use crate::issue::Issue;

/// Maximum title size in bytes.
pub const MAX_TITLE_BYTES: usize = 500;

/// Maximum size of description / design / acceptance criteria in bytes.
pub const MAX_BODY_BYTES: usize = 65_536;

/// Maximum parent-child nesting depth.
pub const MAX_CHILD_DEPTH: usize = 3;

/// Valid priority range (inclusive).
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 0..=4;

/// Validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title must be 1-{MAX_TITLE_BYTES} bytes (got {0})")]
    TitleSize(usize),

    #[error("{field} exceeds {MAX_BODY_BYTES} bytes (got {size})")]
    BodySize { field: &'static str, size: usize },

    #[error("priority must be 0-4 (got {0})")]
    PriorityRange(i32),

    #[error("status '{0}' is not a known or registered status")]
    UnknownStatus(String),

    #[error("issue type '{0}' is not a known or registered type")]
    UnknownType(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("parent-child depth limit of {MAX_CHILD_DEPTH} exceeded")]
    DepthExceeded,
}

/// Validates an issue's fields against the bounds and the registered custom
/// statuses/types.
pub fn validate_issue(
    issue: &Issue,
    custom_statuses: &[String],
    custom_types: &[String],
) -> Result<(), ValidationError> {
    if issue.title.is_empty() || issue.title.len() > MAX_TITLE_BYTES {
        return Err(ValidationError::TitleSize(issue.title.len()));
    }
    for (field, value) in [
        ("description", &issue.description),
        ("design", &issue.design),
        ("acceptance_criteria", &issue.acceptance_criteria),
    ] {
        if value.len() > MAX_BODY_BYTES {
            return Err(ValidationError::BodySize {
                field,
                size: value.len(),
            });
        }
    }
    if !PRIORITY_RANGE.contains(&issue.priority) {
        return Err(ValidationError::PriorityRange(issue.priority));
    }
    if !issue.status.is_valid_with_custom(custom_statuses) {
        return Err(ValidationError::UnknownStatus(issue.status.as_str().into()));
    }
    if !issue.issue_type.is_valid_with_custom(custom_types) {
        return Err(ValidationError::UnknownType(
            issue.issue_type.as_str().into(),
        ));
    }
    Ok(())
}

/// Validates a status transition.
///
/// Any non-tombstone status may move to any other non-tombstone status.
/// Any status may move to tombstone. Tombstone is terminal.
pub fn validate_transition(from: &Status, to: &Status) -> Result<(), ValidationError> {
    if from.is_tombstone() && !to.is_tombstone() {
        return Err(ValidationError::InvalidTransition {
            from: from.as_str().into(),
            to: to.as_str().into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn valid_issue_passes() {
        let issue = IssueBuilder::new("A fine title").priority(2).build();
        assert!(validate_issue(&issue, &[], &[]).is_ok());
    }

    #[test]
    fn empty_title_rejected() {
        let issue = IssueBuilder::new("").build();
        assert!(matches!(
            validate_issue(&issue, &[], &[]),
            Err(ValidationError::TitleSize(0))
        ));
    }

    #[test]
    fn description_at_limit_accepted_one_over_rejected() {
        let at_limit = IssueBuilder::new("t")
            .description("x".repeat(MAX_BODY_BYTES))
            .build();
        assert!(validate_issue(&at_limit, &[], &[]).is_ok());

        let over = IssueBuilder::new("t")
            .description("x".repeat(MAX_BODY_BYTES + 1))
            .build();
        assert!(matches!(
            validate_issue(&over, &[], &[]),
            Err(ValidationError::BodySize { field: "description", .. })
        ));
    }

    #[test]
    fn priority_out_of_range_rejected() {
        let issue = IssueBuilder::new("t").priority(5).build();
        assert!(matches!(
            validate_issue(&issue, &[], &[]),
            Err(ValidationError::PriorityRange(5))
        ));
        let issue = IssueBuilder::new("t").priority(-1).build();
        assert!(validate_issue(&issue, &[], &[]).is_err());
    }

    #[test]
    fn custom_status_requires_registration() {
        let issue = IssueBuilder::new("t")
            .status(Status::Custom("triage".into()))
            .build();
        assert!(validate_issue(&issue, &[], &[]).is_err());
        assert!(validate_issue(&issue, &["triage".to_string()], &[]).is_ok());
    }

    #[test]
    fn tombstone_is_one_way() {
        assert!(validate_transition(&Status::Open, &Status::Tombstone).is_ok());
        assert!(validate_transition(&Status::Closed, &Status::Tombstone).is_ok());
        assert!(validate_transition(&Status::Tombstone, &Status::Tombstone).is_ok());
        assert!(validate_transition(&Status::Tombstone, &Status::Open).is_err());
        assert!(validate_transition(&Status::Tombstone, &Status::Closed).is_err());
    }

    #[test]
    fn non_tombstone_transitions_are_free() {
        assert!(validate_transition(&Status::Closed, &Status::Open).is_ok());
        assert!(validate_transition(&Status::Deferred, &Status::InProgress).is_ok());
    }
}
