//! Collaborator traits implemented by persistence, object-store, and owner adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CopyResult, ObjectStoreError};
use crate::model::{
    BlobTransfer, CopyOperation, CopyStatus, EntityMapping, EntityRow, EntityType, HistoryEntry,
    NewCopyOperation, NewHistoryEntry, OwnerRequest, TargetOwner,
};

/// Persistence of copy operations.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Insert a new `PENDING` operation.
    ///
    /// Fails with `Conflict` when another active operation exists for the same
    /// source training and owner.
    async fn insert_operation(&self, operation: &NewCopyOperation) -> CopyResult<CopyOperation>;

    /// Active (`PENDING` or `IN_PROGRESS`) operation for the pair, if any.
    async fn find_active_operation(
        &self,
        source_training_id: i64,
        owner: &TargetOwner,
    ) -> CopyResult<Option<CopyOperation>>;

    /// Load an operation by id.
    async fn get_operation(&self, id: Uuid) -> CopyResult<Option<CopyOperation>>;

    /// Move the operation to `IN_PROGRESS` under `claim_id`.
    ///
    /// Succeeds from `PENDING` and `FAILED`, and from an `IN_PROGRESS` whose last
    /// heartbeat is older than `stale_before`. A reclaim replaces the previous
    /// claim id, fencing off the worker that held it. Returns `None` when the
    /// operation cannot be claimed.
    async fn claim_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> CopyResult<Option<CopyOperation>>;

    /// Refresh the heartbeat of an operation still held under `claim_id`.
    ///
    /// Fails with `ConcurrentModification` once the claim has been lost.
    async fn heartbeat(&self, id: Uuid, claim_id: Uuid) -> CopyResult<()>;

    /// Record the terminal status of the run holding `claim_id`.
    ///
    /// Fails with `ConcurrentModification` once the claim has been lost.
    async fn finish_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        status: CopyStatus,
        error_message: Option<&str>,
        target_training_id: Option<i64>,
    ) -> CopyResult<CopyOperation>;

    /// Operations requested by the user, newest first.
    async fn list_initiated_by(&self, user_id: Uuid) -> CopyResult<Vec<CopyOperation>>;

    /// Operations whose copy belongs to the owner, newest first.
    async fn list_received_by(&self, owner: &TargetOwner) -> CopyResult<Vec<CopyOperation>>;

    /// Operations a worker could claim now, oldest first.
    async fn list_claimable(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CopyResult<Vec<Uuid>>;
}

/// Ledger of per-entity copy progress.
#[async_trait]
pub trait MappingRegistry: Send + Sync {
    /// Return the mapping for the key, inserting a `PENDING` one when absent.
    async fn find_or_create(
        &self,
        operation_id: Uuid,
        entity_type: EntityType,
        source_entity_id: i64,
    ) -> CopyResult<EntityMapping>;

    /// `PENDING | FAILED -> IN_PROGRESS`, guarded on the mapping's current status.
    async fn mark_in_progress(&self, mapping: &EntityMapping) -> CopyResult<EntityMapping>;

    /// `IN_PROGRESS -> COMPLETED`, recording the target id and blob transfers.
    async fn mark_completed(
        &self,
        mapping: &EntityMapping,
        target_entity_id: i64,
        blobs: &[BlobTransfer],
    ) -> CopyResult<EntityMapping>;

    /// `IN_PROGRESS -> FAILED`, recording the error.
    async fn mark_failed(&self, mapping: &EntityMapping, error: &str) -> CopyResult<EntityMapping>;

    /// Mappings of the operation in creation order.
    async fn list_mappings(&self, operation_id: Uuid) -> CopyResult<Vec<EntityMapping>>;

    /// Whether the operation has mappings and every one is `COMPLETED`.
    async fn is_fully_complete(&self, operation_id: Uuid) -> CopyResult<bool>;

    /// Whether any mapping of the operation is `FAILED`.
    async fn has_any_failed(&self, operation_id: Uuid) -> CopyResult<bool>;
}

/// Append-only audit log.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append an entry.
    async fn append_history(&self, entry: &NewHistoryEntry) -> CopyResult<HistoryEntry>;

    /// Entries of the operation in insertion order.
    async fn list_history(&self, operation_id: Uuid) -> CopyResult<Vec<HistoryEntry>>;
}

/// Read and write access to the pipeline graph.
#[async_trait]
pub trait PipelineCatalog: Send + Sync {
    /// Load a source row.
    async fn load_row(&self, entity_type: EntityType, id: i64) -> CopyResult<Option<EntityRow>>;

    /// Model produced by the training, if one exists.
    async fn model_for_training(&self, training_id: i64) -> CopyResult<Option<i64>>;

    /// Insert the target row and record its id on the mapping atomically.
    ///
    /// The mapping must be `IN_PROGRESS` without a target id; otherwise nothing
    /// is written and `ConcurrentModification` is returned.
    async fn persist_target(&self, mapping: &EntityMapping, row: &EntityRow) -> CopyResult<i64>;
}

/// Every persistence concern the engine needs, behind one handle.
pub trait CopyStore: OperationRepository + MappingRegistry + HistoryLog + PipelineCatalog {}

impl<T> CopyStore for T where T: OperationRepository + MappingRegistry + HistoryLog + PipelineCatalog {}

/// Object-store client contract.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy an object, overwriting the destination. Returns the destination key.
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<String, ObjectStoreError>;

    /// Whether an object exists. Absence is `Ok(false)`, never an error.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError>;
}

/// Resolves a requested owner into a concrete one; called once per operation.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// Resolve the owner, failing with `NotFound` when it does not exist.
    async fn resolve(&self, request: &OwnerRequest) -> CopyResult<TargetOwner>;
}
