//! Operation lifecycle: start, run, retry, and inspection of pipeline copies.
//!
//! # Design
//! - The plan is computed once by `start_copy` and cached on the operation.
//! - A run claims the operation with a compare-and-set under a fresh claim id; a
//!   second worker racing for the same operation gets `Conflict`. Heartbeats and
//!   the final status write carry the claim id, so a worker whose stale claim was
//!   taken over cannot touch the operation again.
//! - Entity failures end the run with `Ok(CopyStatus::Failed)`. Any other error
//!   marks the operation `FAILED` best-effort and is returned to the caller.

use std::error::Error as _;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use replica_core::{
    Buckets, CopyError, CopyOperation, CopyResult, CopyStatus, CopyStore, EntityType,
    HistoryAction, HistoryEntry, HistoryLog, MappingSummary, NewCopyOperation, ObjectStore,
    OwnerRequest, OwnerResolver, PlannedEntity,
};
use replica_telemetry::Metrics;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::copier::{EntityCopier, ParentTargets};
use crate::history::HistoryRecorder;
use crate::planner::plan_copy;

/// Heartbeat age after which an `IN_PROGRESS` operation may be reclaimed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(900);

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Bucket per blob role.
    pub buckets: Buckets,
    /// Heartbeat age after which an in-progress run is presumed dead.
    pub stale_after: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            buckets: Buckets::default(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Request to replicate a training pipeline to a new owner.
#[derive(Debug, Clone)]
pub struct StartCopyRequest {
    /// Training anchoring the pipeline.
    pub source_training_id: i64,
    /// Receiving user or group.
    pub target: OwnerRequest,
    /// User asking for the copy.
    pub initiated_by: Uuid,
    /// Free-form note stored on the operation.
    pub comment: Option<String>,
}

/// Identifier and status returned by `start_copy` and `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CopyOperationHandle {
    /// Operation identifier.
    pub operation_id: Uuid,
    /// Status at the time the call returned.
    pub status: CopyStatus,
}

/// Operation state with per-entity progress.
#[derive(Debug, Clone, Serialize)]
pub struct CopyStatusReport {
    /// The operation record.
    pub operation: CopyOperation,
    /// One entry per mapping, in creation order.
    pub mappings: Vec<MappingSummary>,
    /// Failure recorded on the operation, if any.
    pub error_message: Option<String>,
}

/// Drives copy operations against the store and object store.
pub struct CopyOrchestrator {
    store: Arc<dyn CopyStore>,
    owners: Arc<dyn OwnerResolver>,
    copier: EntityCopier,
    history: HistoryRecorder,
    metrics: Metrics,
    stale_after: Duration,
}

impl CopyOrchestrator {
    /// Wire an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn CopyStore>,
        objects: Arc<dyn ObjectStore>,
        owners: Arc<dyn OwnerResolver>,
        options: OrchestratorOptions,
        metrics: Metrics,
    ) -> Self {
        let copier = EntityCopier::new(
            Arc::clone(&store),
            objects,
            options.buckets,
            metrics.clone(),
        );
        let history = HistoryRecorder::new(Arc::clone(&store) as Arc<dyn HistoryLog>);
        Self {
            store,
            owners,
            copier,
            history,
            metrics,
            stale_after: options.stale_after,
        }
    }

    /// Metrics shared with the copier and worker pool.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validate the request, plan the copy, and persist a `PENDING` operation.
    ///
    /// # Errors
    ///
    /// - [`CopyError::NotFound`] when the owner or source training does not exist.
    /// - [`CopyError::Conflict`] when an active operation exists for the same pair.
    /// - [`CopyError::Structural`] when the source pipeline is incomplete.
    #[instrument(
        name = "start_copy",
        skip(self, request),
        fields(source_training_id = request.source_training_id)
    )]
    pub async fn start_copy(&self, request: StartCopyRequest) -> CopyResult<CopyOperationHandle> {
        let target = self.owners.resolve(&request.target).await?;
        if let Some(active) = self
            .store
            .find_active_operation(request.source_training_id, &target)
            .await?
        {
            return Err(CopyError::Conflict {
                source_training_id: request.source_training_id,
                owner: target.key(),
                operation_id: Some(active.id),
            });
        }

        let plan = plan_copy(self.store.as_ref(), request.source_training_id).await?;
        let entities = plan.len();
        let operation = self
            .store
            .insert_operation(&NewCopyOperation {
                id: Uuid::new_v4(),
                source_training_id: request.source_training_id,
                initiated_by: request.initiated_by,
                target,
                comment: request.comment,
                plan,
            })
            .await?;

        self.history
            .record(
                operation.id,
                HistoryAction::CopyInitiated,
                Some(operation.initiated_by),
                Some(format!(
                    "training {} to {target} ({entities} entities)",
                    operation.source_training_id
                )),
            )
            .await;
        info!(operation_id = %operation.id, owner = %target, entities, "copy operation created");
        Ok(CopyOperationHandle {
            operation_id: operation.id,
            status: operation.status,
        })
    }

    /// Claim and run an operation to a terminal status.
    ///
    /// A `COMPLETED` operation is left untouched.
    ///
    /// # Errors
    ///
    /// - [`CopyError::NotFound`] when the operation does not exist.
    /// - [`CopyError::Conflict`] when another worker holds a live claim.
    /// - Store failures outside an entity copy; the operation is marked `FAILED`.
    #[instrument(name = "run_copy", skip(self), fields(operation_id = %operation_id))]
    pub async fn run(&self, operation_id: Uuid) -> CopyResult<CopyStatus> {
        self.claim_and_run(operation_id, None).await
    }

    /// Resume a `FAILED` (or never started) operation at its first incomplete entity.
    ///
    /// `RETRY_REQUESTED` is recorded only once the retry holds the operation.
    ///
    /// # Errors
    ///
    /// - [`CopyError::NotFound`] when the operation does not exist.
    /// - [`CopyError::AlreadyCompleted`] when the operation already succeeded.
    /// - Any error [`Self::run`] returns.
    #[instrument(name = "retry_copy", skip(self), fields(operation_id = %operation_id))]
    pub async fn retry(&self, operation_id: Uuid, actor: Uuid) -> CopyResult<CopyOperationHandle> {
        let operation = self.load(operation_id).await?;
        if operation.status == CopyStatus::Completed {
            return Err(CopyError::AlreadyCompleted { operation_id });
        }
        let status = self.claim_and_run(operation_id, Some(actor)).await?;
        Ok(CopyOperationHandle {
            operation_id,
            status,
        })
    }

    async fn claim_and_run(
        &self,
        operation_id: Uuid,
        retry_actor: Option<Uuid>,
    ) -> CopyResult<CopyStatus> {
        let before = self.load(operation_id).await?;
        if before.status == CopyStatus::Completed {
            return Ok(CopyStatus::Completed);
        }

        let claim_id = Uuid::new_v4();
        let Some(operation) = self
            .store
            .claim_operation(operation_id, claim_id, self.stale_before())
            .await?
        else {
            return match self.load(operation_id).await?.status {
                CopyStatus::Completed => Ok(CopyStatus::Completed),
                _ => Err(CopyError::Conflict {
                    source_training_id: before.source_training_id,
                    owner: before.target.key(),
                    operation_id: Some(operation_id),
                }),
            };
        };
        if let Some(actor) = retry_actor {
            self.history
                .record(
                    operation_id,
                    HistoryAction::RetryRequested,
                    Some(actor),
                    before.error_message.clone(),
                )
                .await;
        }
        if before.status != CopyStatus::Pending {
            self.history
                .record(
                    operation_id,
                    HistoryAction::CopyResumed,
                    Some(operation.initiated_by),
                    Some(format!("resumed from {}", before.status)),
                )
                .await;
        }

        self.metrics.add_active_operations(1);
        let outcome = self.execute(&operation, claim_id).await;
        self.metrics.add_active_operations(-1);

        match outcome {
            Ok(status) => Ok(status),
            Err(err) => {
                self.abort(&operation, claim_id, &err).await;
                Err(err)
            }
        }
    }

    /// Operation state with its mappings.
    ///
    /// # Errors
    ///
    /// [`CopyError::NotFound`] when the operation does not exist, or a store failure.
    pub async fn status(&self, operation_id: Uuid) -> CopyResult<CopyStatusReport> {
        let operation = self.load(operation_id).await?;
        let mappings = self.store.list_mappings(operation_id).await?;
        Ok(CopyStatusReport {
            error_message: operation.error_message.clone(),
            mappings: mappings.iter().map(MappingSummary::from).collect(),
            operation,
        })
    }

    /// Audit trail of an operation, oldest first.
    ///
    /// # Errors
    ///
    /// [`CopyError::NotFound`] when the operation does not exist, or a store failure.
    pub async fn history(&self, operation_id: Uuid) -> CopyResult<Vec<HistoryEntry>> {
        self.load(operation_id).await?;
        self.store.list_history(operation_id).await
    }

    /// Operations started by `user_id`, most recent first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_initiated_by(&self, user_id: Uuid) -> CopyResult<Vec<CopyOperation>> {
        self.store.list_initiated_by(user_id).await
    }

    /// Operations targeting the resolved owner, most recent first.
    ///
    /// # Errors
    ///
    /// [`CopyError::NotFound`] when the owner cannot be resolved, or a store failure.
    pub async fn list_received_by(&self, owner: &OwnerRequest) -> CopyResult<Vec<CopyOperation>> {
        let target = self.owners.resolve(owner).await?;
        self.store.list_received_by(&target).await
    }

    /// Operations a worker may pick up: `PENDING`, or `IN_PROGRESS` with a stale heartbeat.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn claimable(&self, limit: i64) -> CopyResult<Vec<Uuid>> {
        self.store.list_claimable(self.stale_before(), limit).await
    }

    async fn load(&self, operation_id: Uuid) -> CopyResult<CopyOperation> {
        self.store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| CopyError::not_found("copy operation", operation_id))
    }

    fn stale_before(&self) -> DateTime<Utc> {
        let window = TimeDelta::from_std(self.stale_after).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn execute(&self, operation: &CopyOperation, claim_id: Uuid) -> CopyResult<CopyStatus> {
        let mut parent_targets = ParentTargets::new();
        let mut failure = None;
        for planned in operation.plan.iter() {
            self.store.heartbeat(operation.id, claim_id).await?;
            if let Some(message) = self
                .copy_planned(operation, planned, &mut parent_targets)
                .await?
            {
                failure = Some(message);
                break;
            }
        }

        let error_message = match failure {
            Some(message) => Some(message),
            None => self.incomplete_reason(operation).await?,
        };
        let status = if error_message.is_some() {
            CopyStatus::Failed
        } else {
            CopyStatus::Completed
        };
        let target_training_id = parent_targets
            .get(&(EntityType::Training, operation.plan.root_training_id))
            .copied();
        self.store
            .finish_operation(
                operation.id,
                claim_id,
                status,
                error_message.as_deref(),
                target_training_id,
            )
            .await?;
        self.metrics.inc_operation(status.as_str());

        let (action, detail) = match error_message {
            Some(message) => (HistoryAction::CopyFailed, message),
            None => (
                HistoryAction::CopyCompleted,
                format!("{} entities copied", operation.plan.len()),
            ),
        };
        self.history
            .record(
                operation.id,
                action,
                Some(operation.initiated_by),
                Some(detail),
            )
            .await;
        info!(
            status = %status,
            target_training_id = ?target_training_id,
            "copy run finished"
        );
        Ok(status)
    }

    /// Bring one planned entity to `COMPLETED`, recording its target id.
    ///
    /// Returns the failure description when the entity could not be copied.
    async fn copy_planned(
        &self,
        operation: &CopyOperation,
        planned: &PlannedEntity,
        parent_targets: &mut ParentTargets,
    ) -> CopyResult<Option<String>> {
        let mapping = self
            .store
            .find_or_create(operation.id, planned.entity_type, planned.source_id)
            .await?;
        if mapping.is_completed()
            && let Some(target_id) = mapping.target_entity_id
        {
            parent_targets.insert(planned.key(), target_id);
            return Ok(None);
        }
        let mapping = if mapping.status == CopyStatus::InProgress {
            mapping
        } else {
            self.store.mark_in_progress(&mapping).await?
        };

        match self
            .copier
            .copy(operation, &mapping, planned, parent_targets)
            .await
        {
            Ok(copied) => {
                self.store
                    .mark_completed(&mapping, copied.target_id, &copied.blobs)
                    .await?;
                self.metrics
                    .inc_entity_copy(planned.entity_type.as_str(), "completed");
                self.history
                    .record(
                        operation.id,
                        HistoryAction::EntityCopied,
                        Some(operation.initiated_by),
                        Some(format!(
                            "{} {} -> {}",
                            planned.entity_type, planned.source_id, copied.target_id
                        )),
                    )
                    .await;
                parent_targets.insert(planned.key(), copied.target_id);
                Ok(None)
            }
            Err(CopyError::EntityCopy(entity_failure)) => {
                let message = entity_failure.describe();
                self.store.mark_failed(&mapping, &message).await?;
                self.metrics
                    .inc_entity_copy(planned.entity_type.as_str(), "failed");
                self.history
                    .record(
                        operation.id,
                        HistoryAction::EntityFailed,
                        Some(operation.initiated_by),
                        Some(message.clone()),
                    )
                    .await;
                warn!(
                    entity_type = %planned.entity_type,
                    source_id = planned.source_id,
                    error = %message,
                    "entity copy failed"
                );
                Ok(Some(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Why a run without entity failures still cannot be marked complete.
    async fn incomplete_reason(&self, operation: &CopyOperation) -> CopyResult<Option<String>> {
        if !self.store.is_fully_complete(operation.id).await? {
            return Ok(Some("not every entity mapping completed".to_string()));
        }
        let mapped = self.store.list_mappings(operation.id).await?.len();
        if mapped != operation.plan.len() {
            return Ok(Some(format!(
                "{mapped} of {} planned entities mapped",
                operation.plan.len()
            )));
        }
        Ok(None)
    }

    /// Mark the operation `FAILED`, unless another run has taken it over.
    async fn abort(&self, operation: &CopyOperation, claim_id: Uuid, err: &CopyError) {
        let message = error_chain(err);
        warn!(
            operation_id = %operation.id,
            error = %message,
            "copy run aborted"
        );
        match self
            .store
            .finish_operation(
                operation.id,
                claim_id,
                CopyStatus::Failed,
                Some(&message),
                None,
            )
            .await
        {
            Ok(_) => {}
            Err(CopyError::ConcurrentModification { .. }) => {
                warn!(
                    operation_id = %operation.id,
                    "claim lost; operation left to its current run"
                );
                return;
            }
            Err(finish_err) => {
                warn!(
                    operation_id = %operation.id,
                    error = %finish_err,
                    "failed to mark aborted operation as failed"
                );
                return;
            }
        }
        self.metrics.inc_operation(CopyStatus::Failed.as_str());
        self.history
            .record(
                operation.id,
                HistoryAction::CopyFailed,
                Some(operation.initiated_by),
                Some(message),
            )
            .await;
    }
}

fn error_chain(err: &CopyError) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(inner) = current {
        let _ = write!(message, ": {inner}");
        current = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{OperationRepository, TargetOwner};
    use replica_test_support::fixtures::{PipelineShape, seed_pipeline};
    use replica_test_support::mocks::{MemoryCopyStore, MemoryObjectStore, StaticOwnerResolver};

    fn orchestrator(
        store: &MemoryCopyStore,
        objects: &MemoryObjectStore,
        owners: StaticOwnerResolver,
    ) -> CopyOrchestrator {
        CopyOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(objects.clone()),
            Arc::new(owners),
            OrchestratorOptions::default(),
            Metrics::new().expect("metrics"),
        )
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = CopyError::store("heartbeat", std::io::Error::other("pool timed out"));
        assert_eq!(error_chain(&err), "copy store failure: pool timed out");
    }

    #[test]
    fn stale_window_saturates() {
        let mut engine = orchestrator(
            &MemoryCopyStore::new(),
            &MemoryObjectStore::new(),
            StaticOwnerResolver::new(),
        );
        engine.stale_after = Duration::MAX;
        assert_eq!(engine.stale_before(), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn unknown_owner_is_rejected_before_planning() {
        let store = MemoryCopyStore::new();
        let objects = MemoryObjectStore::new();
        let seeded = seed_pipeline(
            &store,
            &objects,
            &PipelineShape::standard(TargetOwner::Group(1)),
        )
        .await;
        let engine = orchestrator(&store, &objects, StaticOwnerResolver::new());
        let err = engine
            .start_copy(StartCopyRequest {
                source_training_id: seeded.training_id,
                target: OwnerRequest::Username("nobody".into()),
                initiated_by: Uuid::new_v4(),
                comment: None,
            })
            .await
            .expect_err("owner unknown");
        assert!(matches!(err, CopyError::NotFound { .. }));
        assert!(store.list_claimable(Utc::now(), 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn completed_run_is_a_no_op() {
        let store = MemoryCopyStore::new();
        let objects = MemoryObjectStore::new();
        let seeded = seed_pipeline(
            &store,
            &objects,
            &PipelineShape::standard(TargetOwner::Group(1)).without_model(),
        )
        .await;
        let engine = orchestrator(&store, &objects, StaticOwnerResolver::new().with_group(5));
        let handle = engine
            .start_copy(StartCopyRequest {
                source_training_id: seeded.training_id,
                target: OwnerRequest::Group(5),
                initiated_by: Uuid::new_v4(),
                comment: Some("share with team".into()),
            })
            .await
            .expect("start");
        assert_eq!(handle.status, CopyStatus::Pending);

        let status = engine.run(handle.operation_id).await.expect("run");
        assert_eq!(status, CopyStatus::Completed);
        let rows = store.persisted_rows().await.len();
        let copies = objects.copy_calls().await;

        assert_eq!(
            engine.run(handle.operation_id).await.expect("rerun"),
            CopyStatus::Completed
        );
        assert_eq!(store.persisted_rows().await.len(), rows);
        assert_eq!(objects.copy_calls().await, copies);
        assert!(matches!(
            engine.retry(handle.operation_id, Uuid::new_v4()).await,
            Err(CopyError::AlreadyCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn live_claim_conflicts() {
        let store = MemoryCopyStore::new();
        let objects = MemoryObjectStore::new();
        let seeded = seed_pipeline(
            &store,
            &objects,
            &PipelineShape::standard(TargetOwner::Group(1)),
        )
        .await;
        let engine = orchestrator(&store, &objects, StaticOwnerResolver::new().with_group(2));
        let handle = engine
            .start_copy(StartCopyRequest {
                source_training_id: seeded.training_id,
                target: OwnerRequest::Group(2),
                initiated_by: Uuid::new_v4(),
                comment: None,
            })
            .await
            .expect("start");
        store
            .force_operation_state(handle.operation_id, CopyStatus::InProgress, Utc::now())
            .await;

        let err = engine
            .run(handle.operation_id)
            .await
            .expect_err("another worker holds the claim");
        assert!(matches!(
            err,
            CopyError::Conflict { operation_id: Some(id), .. } if id == handle.operation_id
        ));
        assert!(matches!(
            engine.retry(handle.operation_id, Uuid::new_v4()).await,
            Err(CopyError::Conflict { .. })
        ));
        let history = store.list_history(handle.operation_id).await.expect("history");
        assert!(
            history
                .iter()
                .all(|entry| entry.action != HistoryAction::RetryRequested)
        );
        assert!(matches!(
            engine.run(Uuid::new_v4()).await,
            Err(CopyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn superseded_run_leaves_the_operation_alone() {
        let store = MemoryCopyStore::new();
        let objects = MemoryObjectStore::new();
        let seeded = seed_pipeline(
            &store,
            &objects,
            &PipelineShape::standard(TargetOwner::Group(1)),
        )
        .await;
        let engine = orchestrator(&store, &objects, StaticOwnerResolver::new().with_group(2));
        let handle = engine
            .start_copy(StartCopyRequest {
                source_training_id: seeded.training_id,
                target: OwnerRequest::Group(2),
                initiated_by: Uuid::new_v4(),
                comment: None,
            })
            .await
            .expect("start");

        let stalled = Uuid::new_v4();
        let operation = store
            .claim_operation(handle.operation_id, stalled, engine.stale_before())
            .await
            .expect("claim")
            .expect("pending is claimable");
        store
            .force_operation_state(
                handle.operation_id,
                CopyStatus::InProgress,
                Utc::now() - TimeDelta::hours(1),
            )
            .await;
        store
            .claim_operation(handle.operation_id, Uuid::new_v4(), engine.stale_before())
            .await
            .expect("reclaim")
            .expect("stale run is claimable");

        let err = engine
            .execute(&operation, stalled)
            .await
            .expect_err("stalled run lost its claim");
        assert!(matches!(err, CopyError::ConcurrentModification { .. }));
        engine.abort(&operation, stalled, &err).await;

        let current = engine.load(handle.operation_id).await.expect("load");
        assert_eq!(current.status, CopyStatus::InProgress);
        assert!(current.error_message.is_none());
        let history = store.list_history(handle.operation_id).await.expect("history");
        assert!(
            history
                .iter()
                .all(|entry| entry.action != HistoryAction::CopyFailed)
        );
        assert_eq!(engine.metrics().snapshot().operations_failed, 0);
    }
}
