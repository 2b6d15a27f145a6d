//! Enum types for the beads core.
//!
//! `Status` and `IssueType` are open sets: known variants plus a
//! `Custom(String)` fallback for project-registered values. `DependencyType`
//! and `EventType` are closed sets.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }

            /// Returns `true` if this is a built-in variant or one of the
            /// given registered custom values.
            pub fn is_valid_with_custom(&self, custom_values: &[String]) -> bool {
                match self {
                    Self::Custom(s) => custom_values.iter().any(|c| c == s),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

define_enum! {
    /// Current state of an issue. `Tombstone` is terminal: once set it can
    /// never transition away.
    Status, default = Open,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Deferred, "deferred"),
        (Closed, "closed"),
        (Tombstone, "tombstone"),
    ]
}

impl Status {
    /// Returns `true` if the issue is logically deleted.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    /// Returns `true` if this status satisfies a blocking dependency:
    /// the blocker no longer stands in the way of its dependents.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

define_enum! {
    /// Categorises the kind of work. Additional types may be registered via
    /// config at startup and surface as `Custom`.
    IssueType, default = Task,
    variants: [
        (Task, "task"),
        (Bug, "bug"),
        (Feature, "feature"),
        (Epic, "epic"),
        (Chore, "chore"),
        (Gate, "gate"),
        (Message, "message"),
        (MergeRequest, "merge-request"),
        (Molecule, "molecule"),
    ]
}

impl IssueType {
    /// Normalises aliases to their canonical form.
    pub fn normalize(&self) -> Self {
        match self.as_str() {
            "enhancement" | "feat" => Self::Feature,
            "mr" => Self::MergeRequest,
            _ => self.clone(),
        }
    }
}

// ===========================================================================
// DependencyType
// ===========================================================================

/// Relationship type between issues. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    Blocks,
    ParentChild,
    Related,
    DiscoveredFrom,
    RepliesTo,
    Duplicates,
    Supersedes,
}

impl DependencyType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent-child",
            Self::Related => "related",
            Self::DiscoveredFrom => "discovered-from",
            Self::RepliesTo => "replies-to",
            Self::Duplicates => "duplicates",
            Self::Supersedes => "supersedes",
        }
    }

    /// Returns `true` if this edge type blocks work (affects readiness and
    /// participates in cycle detection).
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }

    /// Parses the string form. Unknown strings are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(Self::Blocks),
            "parent-child" => Some(Self::ParentChild),
            "related" => Some(Self::Related),
            "discovered-from" => Some(Self::DiscoveredFrom),
            "replies-to" => Some(Self::RepliesTo),
            "duplicates" => Some(Self::Duplicates),
            "supersedes" => Some(Self::Supersedes),
            _ => None,
        }
    }

    /// SQL fragment listing the blocking edge types.
    pub const BLOCKING_SQL_LIST: &'static str = "'blocks', 'parent-child'";
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Blocks
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DependencyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DependencyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown dependency type: {s}")))
    }
}

// ===========================================================================
// EventType
// ===========================================================================

/// Categorises audit trail events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Commented,
    Closed,
    Reopened,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Tombstoned,
    Purged,
    /// Catch-all for unknown / future event types.
    Other(String),
}

impl EventType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Tombstoned => "tombstoned",
            Self::Purged => "purged",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "status_changed" => Self::StatusChanged,
            "commented" => Self::Commented,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "tombstoned" => Self::Tombstoned,
            "purged" => Self::Purged,
            _ => Self::Other(s),
        }
    }
}

// ===========================================================================
// SortPolicy
// ===========================================================================

define_enum! {
    /// Determines how ready work is ordered.
    SortPolicy, default = Hybrid,
    variants: [
        (Hybrid, "hybrid"),
        (Priority, "priority"),
        (Oldest, "oldest"),
    ]
}
