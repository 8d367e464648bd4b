//! Copy operation aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CopyPlan, CopyStatus, TargetOwner};

/// Operation waiting to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCopyOperation {
    /// Identifier assigned by the caller.
    pub id: Uuid,
    /// Training being replicated.
    pub source_training_id: i64,
    /// User who requested the copy.
    pub initiated_by: Uuid,
    /// Owner of the copy.
    pub target: TargetOwner,
    /// Optional note from the requester.
    pub comment: Option<String>,
    /// Plan computed at request time.
    pub plan: CopyPlan,
}

/// One user-visible replication job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOperation {
    /// Operation identifier.
    pub id: Uuid,
    /// Training being replicated.
    pub source_training_id: i64,
    /// Copied training once its mapping completed.
    pub target_training_id: Option<i64>,
    /// User who requested the copy.
    pub initiated_by: Uuid,
    /// Owner of the copy.
    pub target: TargetOwner,
    /// Optional note from the requester.
    pub comment: Option<String>,
    /// Overall status.
    pub status: CopyStatus,
    /// Last failure description.
    pub error_message: Option<String>,
    /// Plan cached at creation; never recomputed.
    pub plan: CopyPlan,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change or heartbeat.
    pub updated_at: DateTime<Utc>,
}
