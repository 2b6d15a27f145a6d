//! Comment, Event, and Label types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::EventType;
use crate::timefmt;

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Row id. Zero for comments that have not been persisted yet
    /// (e.g. parsed from the manifest).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issue_id: String,

    pub author: String,

    pub text: String,

    #[serde(default = "Utc::now", with = "timefmt")]
    pub created_at: DateTime<Utc>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// An append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,

    pub issue_id: String,

    pub event_type: EventType,

    pub actor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(default = "Utc::now", with = "timefmt")]
    pub created_at: DateTime<Utc>,
}

/// A label (tag) on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub issue_id: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_serde_roundtrip() {
        let c = Comment {
            id: 42,
            issue_id: "bd-abc12".into(),
            author: "alice".into(),
            text: "Looks good to me".into(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&c).unwrap();
        let back: Comment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back.author, "alice");
    }

    #[test]
    fn unpersisted_comment_omits_row_id() {
        let c = Comment {
            id: 0,
            issue_id: String::new(),
            author: "bob".into(),
            text: "inline".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains(r#""id""#));
    }

    #[test]
    fn event_serde_roundtrip() {
        let e = Event {
            id: 1,
            issue_id: "bd-abc12".into(),
            event_type: EventType::StatusChanged,
            actor: "bob".into(),
            old_value: Some("open".into()),
            new_value: Some("closed".into()),
            payload: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::StatusChanged);
        assert_eq!(back.old_value, Some("open".into()));
    }
}
