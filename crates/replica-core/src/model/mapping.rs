//! Entity mappings: the resumability record of a copy operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{BlobRole, CopyStatus, EntityType};

/// Source and target location of one blob belonging to a mapped entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobTransfer {
    /// Role of the blob on its entity.
    pub role: BlobRole,
    /// Bucket holding both source and target objects.
    pub bucket: String,
    /// Key of the source object.
    pub source_key: String,
    /// Deterministic key of the copied object.
    pub target_key: String,
}

/// Ledger entry tying one source entity to its copy within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Storage identifier.
    pub id: i64,
    /// Owning operation.
    pub operation_id: Uuid,
    /// Entity type.
    pub entity_type: EntityType,
    /// Source entity identifier.
    pub source_entity_id: i64,
    /// Copied entity identifier once the row exists.
    pub target_entity_id: Option<i64>,
    /// Blob transfers recorded on completion.
    pub blobs: Vec<BlobTransfer>,
    /// Current status.
    pub status: CopyStatus,
    /// Last failure description.
    pub error_message: Option<String>,
    /// Number of times the mapping entered `IN_PROGRESS`.
    pub attempts: i32,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl EntityMapping {
    /// Whether the mapping finished successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == CopyStatus::Completed
    }
}

/// Per-entity summary returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSummary {
    /// Entity type.
    pub entity_type: EntityType,
    /// Source entity identifier.
    pub source_entity_id: i64,
    /// Copied entity identifier, if created.
    pub target_entity_id: Option<i64>,
    /// Current status.
    pub status: CopyStatus,
    /// Last failure description.
    pub error_message: Option<String>,
    /// Target keys of copied blobs.
    pub target_keys: Vec<String>,
    /// Attempts made so far.
    pub attempts: i32,
}

impl From<&EntityMapping> for MappingSummary {
    fn from(mapping: &EntityMapping) -> Self {
        Self {
            entity_type: mapping.entity_type,
            source_entity_id: mapping.source_entity_id,
            target_entity_id: mapping.target_entity_id,
            status: mapping.status,
            error_message: mapping.error_message.clone(),
            target_keys: mapping
                .blobs
                .iter()
                .map(|blob| blob.target_key.clone())
                .collect(),
            attempts: mapping.attempts,
        }
    }
}
