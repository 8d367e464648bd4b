//! Copy ledger persistence: operations, mappings, history, and owner lookup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replica_core::{
    BlobTransfer, CopyError, CopyOperation, CopyResult, CopyStatus, EntityMapping, EntityType,
    HistoryEntry, HistoryLog, MappingRegistry, NewCopyOperation, NewHistoryEntry,
    OperationRepository, OwnerRequest, OwnerResolver, TargetOwner,
};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DataError, Result};
use crate::rows::{HistoryRow, MappingRow, OperationRow};

/// Name of the partial unique index guarding one active copy per pair.
pub const ACTIVE_PAIR_CONSTRAINT: &str = "copy_operations_active_pair";

macro_rules! operation_columns {
    () => {
        r"id, source_training_id, target_training_id, initiated_by, target_user_id,
          target_group_id, comment, status::text AS status, error_message, plan,
          created_at, updated_at"
    };
}

macro_rules! mapping_columns {
    () => {
        r"id, operation_id, entity_type::text AS entity_type, source_entity_id,
          target_entity_id, blobs, status::text AS status, error_message, attempts, updated_at"
    };
}

const INSERT_OPERATION_SQL: &str = concat!(
    r"INSERT INTO replica.copy_operations
        (id, source_training_id, initiated_by, target_user_id, target_group_id,
         owner_key, comment, plan)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
      RETURNING ",
    operation_columns!()
);

const SELECT_OPERATION_SQL: &str = concat!(
    "SELECT ",
    operation_columns!(),
    " FROM replica.copy_operations WHERE id = $1"
);

const SELECT_ACTIVE_OPERATION_SQL: &str = concat!(
    "SELECT ",
    operation_columns!(),
    r" FROM replica.copy_operations
       WHERE source_training_id = $1
         AND owner_key = $2
         AND status IN ('pending', 'in_progress')"
);

const CLAIM_OPERATION_SQL: &str = concat!(
    r"UPDATE replica.copy_operations
      SET status = 'in_progress', claim_id = $2, updated_at = now()
      WHERE id = $1
        AND (status IN ('pending', 'failed')
             OR (status = 'in_progress' AND updated_at < $3))
      RETURNING ",
    operation_columns!()
);

const HEARTBEAT_OPERATION_SQL: &str = r"
    UPDATE replica.copy_operations
    SET updated_at = now()
    WHERE id = $1 AND status = 'in_progress' AND claim_id = $2
";

const FINISH_OPERATION_SQL: &str = concat!(
    r"UPDATE replica.copy_operations
      SET status = $3::replica.copy_status,
          error_message = $4,
          target_training_id = COALESCE($5, target_training_id),
          claim_id = NULL,
          updated_at = now()
      WHERE id = $1 AND status = 'in_progress' AND claim_id = $2
      RETURNING ",
    operation_columns!()
);

const LIST_INITIATED_SQL: &str = concat!(
    "SELECT ",
    operation_columns!(),
    " FROM replica.copy_operations WHERE initiated_by = $1 ORDER BY created_at DESC"
);

const LIST_RECEIVED_SQL: &str = concat!(
    "SELECT ",
    operation_columns!(),
    " FROM replica.copy_operations WHERE owner_key = $1 ORDER BY created_at DESC"
);

const LIST_CLAIMABLE_SQL: &str = r"
    SELECT id
    FROM replica.copy_operations
    WHERE status = 'pending'
       OR (status = 'in_progress' AND updated_at < $1)
    ORDER BY created_at
    LIMIT $2
";

const INSERT_MAPPING_SQL: &str = r"
    INSERT INTO replica.copy_mappings (operation_id, entity_type, source_entity_id)
    VALUES ($1, $2::replica.entity_type, $3)
    ON CONFLICT (operation_id, entity_type, source_entity_id) DO NOTHING
";

const SELECT_MAPPING_SQL: &str = concat!(
    "SELECT ",
    mapping_columns!(),
    r" FROM replica.copy_mappings
       WHERE operation_id = $1
         AND entity_type = $2::replica.entity_type
         AND source_entity_id = $3"
);

const MARK_MAPPING_IN_PROGRESS_SQL: &str = concat!(
    r"UPDATE replica.copy_mappings
      SET status = 'in_progress', attempts = attempts + 1, updated_at = now()
      WHERE id = $1 AND status = $2::replica.copy_status
      RETURNING ",
    mapping_columns!()
);

const MARK_MAPPING_COMPLETED_SQL: &str = concat!(
    r"UPDATE replica.copy_mappings
      SET status = 'completed',
          target_entity_id = $2,
          blobs = $3,
          error_message = NULL,
          updated_at = now()
      WHERE id = $1 AND status = 'in_progress'
      RETURNING ",
    mapping_columns!()
);

const MARK_MAPPING_FAILED_SQL: &str = concat!(
    r"UPDATE replica.copy_mappings
      SET status = 'failed', error_message = $2, updated_at = now()
      WHERE id = $1 AND status = 'in_progress'
      RETURNING ",
    mapping_columns!()
);

const LIST_MAPPINGS_SQL: &str = concat!(
    "SELECT ",
    mapping_columns!(),
    " FROM replica.copy_mappings WHERE operation_id = $1 ORDER BY id"
);

const FULLY_COMPLETE_SQL: &str = r"
    SELECT COALESCE(bool_and(status = 'completed'), FALSE)
    FROM replica.copy_mappings
    WHERE operation_id = $1
";

const ANY_FAILED_SQL: &str = r"
    SELECT EXISTS (
        SELECT 1 FROM replica.copy_mappings
        WHERE operation_id = $1 AND status = 'failed'
    )
";

const INSERT_HISTORY_SQL: &str = r"
    INSERT INTO replica.copy_history (operation_id, action, actor, detail)
    VALUES ($1, $2, $3, $4)
    RETURNING id, operation_id, action, actor, recorded_at, detail
";

const LIST_HISTORY_SQL: &str = r"
    SELECT id, operation_id, action, actor, recorded_at, detail
    FROM replica.copy_history
    WHERE operation_id = $1
    ORDER BY id
";

const SELECT_USER_BY_NAME_SQL: &str = r"SELECT id FROM replica.users WHERE username = $1";

const SELECT_GROUP_SQL: &str = r"SELECT id FROM replica.groups WHERE id = $1";

/// Database-backed implementation of every persistence trait the engine uses.
#[derive(Clone)]
pub struct PgCopyStore {
    pool: PgPool,
}

impl PgCopyStore {
    /// Initialise the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn query_failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> CopyError {
    move |source| CopyError::store(operation, DataError::QueryFailed { operation, source })
}

pub(crate) fn decode_failed(operation: &'static str) -> impl FnOnce(DataError) -> CopyError {
    move |err| CopyError::store(operation, err)
}

fn decode_all<R, T>(operation: &'static str, rows: Vec<R>) -> CopyResult<Vec<T>>
where
    T: TryFrom<R, Error = DataError>,
{
    rows.into_iter()
        .map(T::try_from)
        .collect::<Result<Vec<_>>>()
        .map_err(decode_failed(operation))
}

fn mapping_conflict(mapping: &EntityMapping, expected: CopyStatus) -> CopyError {
    CopyError::ConcurrentModification {
        resource: "mapping",
        id: mapping.id.to_string(),
        expected,
    }
}

fn claim_lost(id: Uuid) -> CopyError {
    CopyError::ConcurrentModification {
        resource: "operation",
        id: id.to_string(),
        expected: CopyStatus::InProgress,
    }
}

#[async_trait]
impl OperationRepository for PgCopyStore {
    async fn insert_operation(&self, operation: &NewCopyOperation) -> CopyResult<CopyOperation> {
        let result = sqlx::query_as::<_, OperationRow>(INSERT_OPERATION_SQL)
            .bind(operation.id)
            .bind(operation.source_training_id)
            .bind(operation.initiated_by)
            .bind(operation.target.user_id())
            .bind(operation.target.group_id())
            .bind(operation.target.key())
            .bind(operation.comment.as_deref())
            .bind(Json(&operation.plan))
            .fetch_one(&self.pool)
            .await;

        let row = match result {
            Ok(row) => row,
            Err(source) => {
                let err = DataError::QueryFailed {
                    operation: "copy_operations.insert",
                    source,
                };
                if err.is_unique_violation(ACTIVE_PAIR_CONSTRAINT) {
                    let active = self
                        .find_active_operation(operation.source_training_id, &operation.target)
                        .await?;
                    return Err(CopyError::Conflict {
                        source_training_id: operation.source_training_id,
                        owner: operation.target.key(),
                        operation_id: active.map(|active| active.id),
                    });
                }
                return Err(CopyError::store("copy_operations.insert", err));
            }
        };
        debug!(operation_id = %operation.id, "copy operation persisted");
        CopyOperation::try_from(row).map_err(decode_failed("copy_operations.insert"))
    }

    async fn find_active_operation(
        &self,
        source_training_id: i64,
        owner: &TargetOwner,
    ) -> CopyResult<Option<CopyOperation>> {
        sqlx::query_as::<_, OperationRow>(SELECT_ACTIVE_OPERATION_SQL)
            .bind(source_training_id)
            .bind(owner.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_operations.find_active"))?
            .map(CopyOperation::try_from)
            .transpose()
            .map_err(decode_failed("copy_operations.find_active"))
    }

    async fn get_operation(&self, id: Uuid) -> CopyResult<Option<CopyOperation>> {
        sqlx::query_as::<_, OperationRow>(SELECT_OPERATION_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_operations.get"))?
            .map(CopyOperation::try_from)
            .transpose()
            .map_err(decode_failed("copy_operations.get"))
    }

    async fn claim_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> CopyResult<Option<CopyOperation>> {
        let result = sqlx::query_as::<_, OperationRow>(CLAIM_OPERATION_SQL)
            .bind(id)
            .bind(claim_id)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await;
        let row = match result {
            Ok(row) => row,
            Err(source) => {
                let err = DataError::QueryFailed {
                    operation: "copy_operations.claim",
                    source,
                };
                if err.is_unique_violation(ACTIVE_PAIR_CONSTRAINT) {
                    // A newer copy for the same pair is active; the failed one cannot resume.
                    let operation = self
                        .get_operation(id)
                        .await?
                        .ok_or_else(|| CopyError::not_found("operation", id))?;
                    let active = self
                        .find_active_operation(operation.source_training_id, &operation.target)
                        .await?;
                    return Err(CopyError::Conflict {
                        source_training_id: operation.source_training_id,
                        owner: operation.target.key(),
                        operation_id: active.map(|active| active.id),
                    });
                }
                return Err(CopyError::store("copy_operations.claim", err));
            }
        };
        row.map(CopyOperation::try_from)
            .transpose()
            .map_err(decode_failed("copy_operations.claim"))
    }

    async fn heartbeat(&self, id: Uuid, claim_id: Uuid) -> CopyResult<()> {
        let updated = sqlx::query(HEARTBEAT_OPERATION_SQL)
            .bind(id)
            .bind(claim_id)
            .execute(&self.pool)
            .await
            .map_err(query_failed("copy_operations.heartbeat"))?
            .rows_affected();
        if updated == 0 {
            return Err(claim_lost(id));
        }
        Ok(())
    }

    async fn finish_operation(
        &self,
        id: Uuid,
        claim_id: Uuid,
        status: CopyStatus,
        error_message: Option<&str>,
        target_training_id: Option<i64>,
    ) -> CopyResult<CopyOperation> {
        CopyStatus::InProgress.ensure_transition(status)?;
        let row = sqlx::query_as::<_, OperationRow>(FINISH_OPERATION_SQL)
            .bind(id)
            .bind(claim_id)
            .bind(status.as_str())
            .bind(error_message)
            .bind(target_training_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_operations.finish"))?
            .ok_or_else(|| claim_lost(id))?;
        CopyOperation::try_from(row).map_err(decode_failed("copy_operations.finish"))
    }

    async fn list_initiated_by(&self, user_id: Uuid) -> CopyResult<Vec<CopyOperation>> {
        let rows = sqlx::query_as::<_, OperationRow>(LIST_INITIATED_SQL)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("copy_operations.list_initiated"))?;
        decode_all("copy_operations.list_initiated", rows)
    }

    async fn list_received_by(&self, owner: &TargetOwner) -> CopyResult<Vec<CopyOperation>> {
        let rows = sqlx::query_as::<_, OperationRow>(LIST_RECEIVED_SQL)
            .bind(owner.key())
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("copy_operations.list_received"))?;
        decode_all("copy_operations.list_received", rows)
    }

    async fn list_claimable(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CopyResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(LIST_CLAIMABLE_SQL)
            .bind(stale_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("copy_operations.list_claimable"))
    }
}

#[async_trait]
impl MappingRegistry for PgCopyStore {
    async fn find_or_create(
        &self,
        operation_id: Uuid,
        entity_type: EntityType,
        source_entity_id: i64,
    ) -> CopyResult<EntityMapping> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("copy_mappings.begin"))?;
        sqlx::query(INSERT_MAPPING_SQL)
            .bind(operation_id)
            .bind(entity_type.as_str())
            .bind(source_entity_id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("copy_mappings.insert"))?;
        let row = sqlx::query_as::<_, MappingRow>(SELECT_MAPPING_SQL)
            .bind(operation_id)
            .bind(entity_type.as_str())
            .bind(source_entity_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_failed("copy_mappings.reread"))?;
        tx.commit()
            .await
            .map_err(query_failed("copy_mappings.commit"))?;
        EntityMapping::try_from(row).map_err(decode_failed("copy_mappings.find_or_create"))
    }

    async fn mark_in_progress(&self, mapping: &EntityMapping) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::InProgress)?;
        let row = sqlx::query_as::<_, MappingRow>(MARK_MAPPING_IN_PROGRESS_SQL)
            .bind(mapping.id)
            .bind(mapping.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.mark_in_progress"))?
            .ok_or_else(|| mapping_conflict(mapping, mapping.status))?;
        EntityMapping::try_from(row).map_err(decode_failed("copy_mappings.mark_in_progress"))
    }

    async fn mark_completed(
        &self,
        mapping: &EntityMapping,
        target_entity_id: i64,
        blobs: &[BlobTransfer],
    ) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::Completed)?;
        let row = sqlx::query_as::<_, MappingRow>(MARK_MAPPING_COMPLETED_SQL)
            .bind(mapping.id)
            .bind(target_entity_id)
            .bind(Json(blobs))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.mark_completed"))?
            .ok_or_else(|| mapping_conflict(mapping, CopyStatus::InProgress))?;
        EntityMapping::try_from(row).map_err(decode_failed("copy_mappings.mark_completed"))
    }

    async fn mark_failed(&self, mapping: &EntityMapping, error: &str) -> CopyResult<EntityMapping> {
        mapping.status.ensure_transition(CopyStatus::Failed)?;
        let row = sqlx::query_as::<_, MappingRow>(MARK_MAPPING_FAILED_SQL)
            .bind(mapping.id)
            .bind(error)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.mark_failed"))?
            .ok_or_else(|| mapping_conflict(mapping, CopyStatus::InProgress))?;
        EntityMapping::try_from(row).map_err(decode_failed("copy_mappings.mark_failed"))
    }

    async fn list_mappings(&self, operation_id: Uuid) -> CopyResult<Vec<EntityMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(LIST_MAPPINGS_SQL)
            .bind(operation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.list"))?;
        decode_all("copy_mappings.list", rows)
    }

    async fn is_fully_complete(&self, operation_id: Uuid) -> CopyResult<bool> {
        sqlx::query_scalar::<_, bool>(FULLY_COMPLETE_SQL)
            .bind(operation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.fully_complete"))
    }

    async fn has_any_failed(&self, operation_id: Uuid) -> CopyResult<bool> {
        sqlx::query_scalar::<_, bool>(ANY_FAILED_SQL)
            .bind(operation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed("copy_mappings.any_failed"))
    }
}

#[async_trait]
impl HistoryLog for PgCopyStore {
    async fn append_history(&self, entry: &NewHistoryEntry) -> CopyResult<HistoryEntry> {
        let row = sqlx::query_as::<_, HistoryRow>(INSERT_HISTORY_SQL)
            .bind(entry.operation_id)
            .bind(entry.action.as_str())
            .bind(entry.actor)
            .bind(entry.detail.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed("copy_history.append"))?;
        HistoryEntry::try_from(row).map_err(decode_failed("copy_history.append"))
    }

    async fn list_history(&self, operation_id: Uuid) -> CopyResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(LIST_HISTORY_SQL)
            .bind(operation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("copy_history.list"))?;
        decode_all("copy_history.list", rows)
    }
}

#[async_trait]
impl OwnerResolver for PgCopyStore {
    async fn resolve(&self, request: &OwnerRequest) -> CopyResult<TargetOwner> {
        match request {
            OwnerRequest::Username(username) => sqlx::query_scalar::<_, Uuid>(SELECT_USER_BY_NAME_SQL)
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_failed("users.resolve"))?
                .map(TargetOwner::User)
                .ok_or_else(|| CopyError::not_found("user", username)),
            OwnerRequest::Group(group_id) => sqlx::query_scalar::<_, i64>(SELECT_GROUP_SQL)
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_failed("groups.resolve"))?
                .map(TargetOwner::Group)
                .ok_or_else(|| CopyError::not_found("group", group_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_use_guarded_updates() {
        for sql in [
            MARK_MAPPING_COMPLETED_SQL,
            MARK_MAPPING_FAILED_SQL,
            FINISH_OPERATION_SQL,
        ] {
            assert!(sql.contains("status = 'in_progress'"));
        }
        assert!(MARK_MAPPING_IN_PROGRESS_SQL.contains("status = $2::replica.copy_status"));
        assert!(INSERT_MAPPING_SQL.contains("ON CONFLICT"));
        assert!(SELECT_OPERATION_SQL.contains("status::text AS status"));
    }

    #[test]
    fn query_failures_keep_operation_context() {
        let err = query_failed("copy_history.list")(sqlx::Error::RowNotFound);
        assert!(matches!(
            err,
            CopyError::Store {
                operation: "copy_history.list",
                ..
            }
        ));
    }
}
