//! Status state machine shared by copy operations and entity mappings.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, CopyResult};

/// Lifecycle status of an operation or a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyStatus {
    /// Created, not yet touched.
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Stopped on a failure; may be retried.
    Failed,
}

impl CopyStatus {
    /// Stable label used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a worker may still be (or become) active on the record.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Transitions permitted by the monotone lifecycle.
    ///
    /// `Failed -> InProgress` is the only backward edge and is taken on retry.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Failed, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }

    /// Fail with `InvalidTransition` unless `self -> next` is permitted.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidTransition`] for forbidden transitions.
    pub const fn ensure_transition(self, next: Self) -> CopyResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CopyError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Display for CopyStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
