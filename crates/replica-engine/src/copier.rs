//! Copies one planned entity: its relational row, then its blobs.
//!
//! # Design
//! - One match over [`EntityRow`] rewires owner, timestamps, and parent keys.
//! - Target blob keys depend only on the operation, entity, and role, so a rerun
//!   reuses what an earlier attempt already wrote.
//! - A row persisted by an earlier attempt is reused; only missing blobs are copied.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use replica_core::{
    BlobRole, BlobTransfer, Buckets, CopyCause, CopyError, CopyOperation, CopyResult, CopyStore,
    EntityCopyFailure, EntityMapping, EntityRow, EntityType, ObjectStore, ObjectStoreError,
    PlannedEntity, TargetOwner,
};
use replica_telemetry::Metrics;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Target ids of completed parents, keyed by `(entity type, source id)`.
pub type ParentTargets = HashMap<(EntityType, i64), i64>;

/// Result of a successful entity copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedEntity {
    /// Identifier of the target row.
    pub target_id: i64,
    /// Blobs copied (or found already copied) for the entity.
    pub blobs: Vec<BlobTransfer>,
}

/// Deterministic object key for a copied blob.
#[must_use]
pub fn target_blob_key(
    operation_id: Uuid,
    entity_type: EntityType,
    source_id: i64,
    role: BlobRole,
    source_key: &str,
) -> String {
    let file_name = source_key
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("object");
    format!("copies/{operation_id}/{entity_type}/{source_id}/{role}/{file_name}")
}

/// Copies single entities on behalf of the orchestrator.
#[derive(Clone)]
pub struct EntityCopier {
    store: Arc<dyn CopyStore>,
    objects: Arc<dyn ObjectStore>,
    buckets: Buckets,
    metrics: Metrics,
}

impl EntityCopier {
    /// Build a copier over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn CopyStore>,
        objects: Arc<dyn ObjectStore>,
        buckets: Buckets,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            objects,
            buckets,
            metrics,
        }
    }

    /// Copy the entity tracked by `mapping`, which must be `IN_PROGRESS`.
    ///
    /// # Errors
    ///
    /// - [`CopyError::PreconditionViolation`] when a parent has no completed target.
    /// - [`CopyError::EntityCopy`] when the source row is gone or a write fails.
    /// - [`CopyError::ConcurrentModification`] when another worker recorded a target first.
    #[instrument(
        name = "copy_entity",
        skip_all,
        fields(
            operation_id = %operation.id,
            entity_type = %planned.entity_type,
            source_id = planned.source_id
        )
    )]
    pub async fn copy(
        &self,
        operation: &CopyOperation,
        mapping: &EntityMapping,
        planned: &PlannedEntity,
        parent_targets: &ParentTargets,
    ) -> CopyResult<CopiedEntity> {
        let entity_type = planned.entity_type;
        let source_id = planned.source_id;
        for parent in &planned.parents {
            if !parent_targets.contains_key(&(parent.entity_type, parent.source_id)) {
                return Err(CopyError::PreconditionViolation {
                    entity_type,
                    source_id,
                    missing_parent: parent.entity_type,
                });
            }
        }
        let fail = |cause: CopyCause| {
            CopyError::EntityCopy(EntityCopyFailure::new(entity_type, source_id, cause))
        };

        let source = self
            .store
            .load_row(entity_type, source_id)
            .await
            .map_err(|err| {
                fail(CopyCause::Relational {
                    source: Box::new(err),
                })
            })?
            .ok_or_else(|| fail(CopyCause::SourceMissing))?;

        let mut target = rebuild_row(&source, &operation.target, Utc::now(), parent_targets)
            .map_err(|missing_parent| CopyError::PreconditionViolation {
                entity_type,
                source_id,
                missing_parent,
            })?;
        let transfers: Vec<BlobTransfer> = source
            .blob_keys()
            .into_iter()
            .map(|(role, source_key)| BlobTransfer {
                role,
                bucket: self.buckets.for_role(role).to_string(),
                source_key: source_key.to_string(),
                target_key: target_blob_key(operation.id, entity_type, source_id, role, source_key),
            })
            .collect();
        for transfer in &transfers {
            target.set_blob_key(transfer.role, transfer.target_key.clone());
        }

        let target_id = match mapping.target_entity_id {
            Some(existing) => {
                debug!(target_id = existing, "reusing target row from earlier attempt");
                existing
            }
            None => match self.store.persist_target(mapping, &target).await {
                Ok(id) => id,
                Err(err @ CopyError::ConcurrentModification { .. }) => return Err(err),
                Err(err) => {
                    return Err(fail(CopyCause::Relational {
                        source: Box::new(err),
                    }));
                }
            },
        };

        for transfer in &transfers {
            self.copy_blob(transfer).await.map_err(|source| {
                fail(CopyCause::Blob {
                    role: transfer.role,
                    source,
                })
            })?;
        }

        Ok(CopiedEntity {
            target_id,
            blobs: transfers,
        })
    }

    async fn copy_blob(
        &self,
        transfer: &BlobTransfer,
    ) -> Result<(), ObjectStoreError> {
        let existing = self
            .objects
            .object_exists(&transfer.bucket, &transfer.target_key)
            .await;
        match existing {
            Ok(true) => {
                self.metrics.inc_blob_copy("skipped");
                debug!(target_key = %transfer.target_key, "blob already copied");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                self.metrics.inc_blob_copy("failed");
                return Err(err);
            }
        }
        match self
            .objects
            .copy_object(
                &transfer.bucket,
                &transfer.source_key,
                &transfer.bucket,
                &transfer.target_key,
            )
            .await
        {
            Ok(_) => {
                self.metrics.inc_blob_copy("copied");
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_blob_copy("failed");
                Err(err)
            }
        }
    }
}

/// Build the target row: owner reassigned, creation time refreshed, parents rewired.
///
/// Returns the parent type lacking a target when rewiring is impossible.
fn rebuild_row(
    source: &EntityRow,
    owner: &TargetOwner,
    now: DateTime<Utc>,
    parent_targets: &ParentTargets,
) -> Result<EntityRow, EntityType> {
    let target_of = |entity_type: EntityType, source_id: i64| {
        parent_targets
            .get(&(entity_type, source_id))
            .copied()
            .ok_or(entity_type)
    };
    let remap = |entity_type: EntityType, source_id: Option<i64>| {
        source_id.map(|id| target_of(entity_type, id)).transpose()
    };

    let row = match source {
        EntityRow::Dataset(dataset) => {
            let mut row = dataset.clone();
            row.owner = *owner;
            row.uploaded_at = now;
            EntityRow::Dataset(row)
        }
        EntityRow::DatasetConfig(config) => {
            let mut row = config.clone();
            row.dataset_id = target_of(EntityType::Dataset, config.dataset_id)?;
            row.uploaded_at = now;
            EntityRow::DatasetConfig(row)
        }
        EntityRow::AlgorithmConfig(config) => {
            let mut row = config.clone();
            row.owner = *owner;
            EntityRow::AlgorithmConfig(row)
        }
        EntityRow::CustomAlgorithmConfig(config) => {
            let mut row = config.clone();
            row.owner = *owner;
            EntityRow::CustomAlgorithmConfig(row)
        }
        EntityRow::Training(training) => {
            let mut row = training.clone();
            row.owner = *owner;
            row.dataset_config_id = remap(EntityType::DatasetConfig, training.dataset_config_id)?;
            row.algorithm_config_id =
                remap(EntityType::AlgorithmConfig, training.algorithm_config_id)?;
            row.custom_algorithm_config_id = remap(
                EntityType::CustomAlgorithmConfig,
                training.custom_algorithm_config_id,
            )?;
            EntityRow::Training(row)
        }
        EntityRow::Model(model) => {
            let mut row = model.clone();
            row.training_id = target_of(EntityType::Training, model.training_id)?;
            row.created_at = now;
            EntityRow::Model(row)
        }
    };
    Ok(row)
}
