//! Append-only audit trail entries.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of fact recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// Operation created.
    CopyInitiated,
    /// A worker claimed the operation.
    CopyResumed,
    /// One entity copied.
    EntityCopied,
    /// One entity failed to copy.
    EntityFailed,
    /// Retry requested by a user.
    RetryRequested,
    /// Every entity copied.
    CopyCompleted,
    /// Run stopped on a failure.
    CopyFailed,
}

impl HistoryAction {
    /// Stable label used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CopyInitiated => "copy_initiated",
            Self::CopyResumed => "copy_resumed",
            Self::EntityCopied => "entity_copied",
            Self::EntityFailed => "entity_failed",
            Self::RetryRequested => "retry_requested",
            Self::CopyCompleted => "copy_completed",
            Self::CopyFailed => "copy_failed",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        [
            Self::CopyInitiated,
            Self::CopyResumed,
            Self::EntityCopied,
            Self::EntityFailed,
            Self::RetryRequested,
            Self::CopyCompleted,
            Self::CopyFailed,
        ]
        .into_iter()
        .find(|action| action.as_str() == label)
    }
}

impl Display for HistoryAction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// History entry waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Operation the entry belongs to.
    pub operation_id: Uuid,
    /// Recorded action.
    pub action: HistoryAction,
    /// User responsible, when a user triggered the action.
    pub actor: Option<Uuid>,
    /// Free-form detail.
    pub detail: Option<String>,
}

/// Immutable fact about an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Insertion-ordered identifier.
    pub id: i64,
    /// Owning operation.
    pub operation_id: Uuid,
    /// Recorded action.
    pub action: HistoryAction,
    /// User responsible, when a user triggered the action.
    pub actor: Option<Uuid>,
    /// Time the entry was appended.
    pub recorded_at: DateTime<Utc>,
    /// Free-form detail.
    pub detail: Option<String>,
}
