//! Pipeline graph access: loading source rows and persisting copied ones.

use async_trait::async_trait;
use replica_core::{
    CopyError, CopyResult, CopyStatus, EntityMapping, EntityRow, EntityType, PipelineCatalog,
};
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::debug;

use crate::error::DataError;
use crate::rows::{
    AlgorithmConfigRow, CustomAlgorithmConfigRow, DatasetConfigRow, DatasetRow, ModelRow,
    TrainingRow,
};
use crate::store::{PgCopyStore, decode_failed, query_failed};

const SELECT_DATASET_SQL: &str = r"
    SELECT id, owner_user_id, owner_group_id, original_file_name, file_name, file_key,
           file_size, content_type, accessibility, category, description, uploaded_at
    FROM replica.datasets
    WHERE id = $1
";

const SELECT_DATASET_CONFIG_SQL: &str = r"
    SELECT dataset_id, basic_attribute_columns, target_column, status, uploaded_at
    FROM replica.dataset_configurations
    WHERE id = $1
";

const SELECT_ALGORITHM_CONFIG_SQL: &str = r"
    SELECT id, owner_user_id, owner_group_id, algorithm_id, options, algorithm_type
    FROM replica.algorithm_configurations
    WHERE id = $1
";

const SELECT_CUSTOM_ALGORITHM_CONFIG_SQL: &str = r"
    SELECT id, owner_user_id, owner_group_id, custom_algorithm_id, parameters_key
    FROM replica.custom_algorithm_configurations
    WHERE id = $1
";

const SELECT_TRAINING_SQL: &str = r"
    SELECT id, owner_user_id, owner_group_id, dataset_configuration_id,
           algorithm_configuration_id, custom_algorithm_configuration_id,
           status, started_at, finished_at, results
    FROM replica.trainings
    WHERE id = $1
";

const SELECT_MODEL_SQL: &str = r"
    SELECT training_id, model_type, status, accessibility, name, description,
           data_description, keywords, finalized, finalized_at, category, created_at,
           model_key, metrics_key, label_mapping_key, feature_columns_key
    FROM replica.models
    WHERE id = $1
";

const SELECT_MODEL_FOR_TRAINING_SQL: &str = r"
    SELECT id FROM replica.models WHERE training_id = $1 ORDER BY id LIMIT 1
";

const INSERT_DATASET_SQL: &str = r"
    INSERT INTO replica.datasets
        (owner_user_id, owner_group_id, original_file_name, file_name, file_key,
         file_size, content_type, accessibility, category, description, uploaded_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    RETURNING id
";

const INSERT_DATASET_CONFIG_SQL: &str = r"
    INSERT INTO replica.dataset_configurations
        (dataset_id, basic_attribute_columns, target_column, status, uploaded_at)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id
";

const INSERT_ALGORITHM_CONFIG_SQL: &str = r"
    INSERT INTO replica.algorithm_configurations
        (owner_user_id, owner_group_id, algorithm_id, options, algorithm_type)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id
";

const INSERT_CUSTOM_ALGORITHM_CONFIG_SQL: &str = r"
    INSERT INTO replica.custom_algorithm_configurations
        (owner_user_id, owner_group_id, custom_algorithm_id, parameters_key)
    VALUES ($1, $2, $3, $4)
    RETURNING id
";

const INSERT_TRAINING_SQL: &str = r"
    INSERT INTO replica.trainings
        (owner_user_id, owner_group_id, dataset_configuration_id, algorithm_configuration_id,
         custom_algorithm_configuration_id, status, started_at, finished_at, results)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    RETURNING id
";

const INSERT_MODEL_SQL: &str = r"
    INSERT INTO replica.models
        (training_id, model_type, status, accessibility, name, description, data_description,
         keywords, finalized, finalized_at, category, created_at, model_key, metrics_key,
         label_mapping_key, feature_columns_key)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    RETURNING id
";

const RECORD_TARGET_SQL: &str = r"
    UPDATE replica.copy_mappings
    SET target_entity_id = $2, updated_at = now()
    WHERE id = $1 AND status = 'in_progress' AND target_entity_id IS NULL
";

impl PgCopyStore {
    async fn fetch_row(
        &self,
        entity_type: EntityType,
        id: i64,
    ) -> CopyResult<Option<Result<EntityRow, DataError>>> {
        let pool = self.pool();
        let row = match entity_type {
            EntityType::Dataset => sqlx::query_as::<_, DatasetRow>(SELECT_DATASET_SQL)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(query_failed("datasets.load"))?
                .map(|row| row.try_into().map(EntityRow::Dataset)),
            EntityType::DatasetConfig => {
                sqlx::query_as::<_, DatasetConfigRow>(SELECT_DATASET_CONFIG_SQL)
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_failed("dataset_configurations.load"))?
                    .map(|row| Ok(EntityRow::DatasetConfig(row.into())))
            }
            EntityType::AlgorithmConfig => {
                sqlx::query_as::<_, AlgorithmConfigRow>(SELECT_ALGORITHM_CONFIG_SQL)
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_failed("algorithm_configurations.load"))?
                    .map(|row| row.try_into().map(EntityRow::AlgorithmConfig))
            }
            EntityType::CustomAlgorithmConfig => {
                sqlx::query_as::<_, CustomAlgorithmConfigRow>(SELECT_CUSTOM_ALGORITHM_CONFIG_SQL)
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_failed("custom_algorithm_configurations.load"))?
                    .map(|row| row.try_into().map(EntityRow::CustomAlgorithmConfig))
            }
            EntityType::Training => sqlx::query_as::<_, TrainingRow>(SELECT_TRAINING_SQL)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(query_failed("trainings.load"))?
                .map(|row| row.try_into().map(EntityRow::Training)),
            EntityType::Model => sqlx::query_as::<_, ModelRow>(SELECT_MODEL_SQL)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(query_failed("models.load"))?
                .map(|row| Ok(EntityRow::Model(row.into()))),
        };
        Ok(row)
    }
}

async fn insert_row(conn: &mut PgConnection, row: &EntityRow) -> Result<i64, sqlx::Error> {
    match row {
        EntityRow::Dataset(dataset) => {
            sqlx::query_scalar::<_, i64>(INSERT_DATASET_SQL)
                .bind(dataset.owner.user_id())
                .bind(dataset.owner.group_id())
                .bind(&dataset.original_file_name)
                .bind(&dataset.file_name)
                .bind(&dataset.file_key)
                .bind(dataset.file_size)
                .bind(&dataset.content_type)
                .bind(&dataset.accessibility)
                .bind(dataset.category.as_deref())
                .bind(dataset.description.as_deref())
                .bind(dataset.uploaded_at)
                .fetch_one(conn)
                .await
        }
        EntityRow::DatasetConfig(config) => {
            sqlx::query_scalar::<_, i64>(INSERT_DATASET_CONFIG_SQL)
                .bind(config.dataset_id)
                .bind(config.basic_attribute_columns.as_deref())
                .bind(config.target_column.as_deref())
                .bind(&config.status)
                .bind(config.uploaded_at)
                .fetch_one(conn)
                .await
        }
        EntityRow::AlgorithmConfig(config) => {
            sqlx::query_scalar::<_, i64>(INSERT_ALGORITHM_CONFIG_SQL)
                .bind(config.owner.user_id())
                .bind(config.owner.group_id())
                .bind(config.algorithm_id)
                .bind(config.options.as_deref())
                .bind(config.algorithm_type.as_deref())
                .fetch_one(conn)
                .await
        }
        EntityRow::CustomAlgorithmConfig(config) => {
            sqlx::query_scalar::<_, i64>(INSERT_CUSTOM_ALGORITHM_CONFIG_SQL)
                .bind(config.owner.user_id())
                .bind(config.owner.group_id())
                .bind(config.custom_algorithm_id)
                .bind(config.parameters_key.as_deref())
                .fetch_one(conn)
                .await
        }
        EntityRow::Training(training) => {
            sqlx::query_scalar::<_, i64>(INSERT_TRAINING_SQL)
                .bind(training.owner.user_id())
                .bind(training.owner.group_id())
                .bind(training.dataset_config_id)
                .bind(training.algorithm_config_id)
                .bind(training.custom_algorithm_config_id)
                .bind(&training.status)
                .bind(training.started_at)
                .bind(training.finished_at)
                .bind(training.results.as_deref())
                .fetch_one(conn)
                .await
        }
        EntityRow::Model(model) => {
            sqlx::query_scalar::<_, i64>(INSERT_MODEL_SQL)
                .bind(model.training_id)
                .bind(model.model_type.as_deref())
                .bind(&model.status)
                .bind(&model.accessibility)
                .bind(model.name.as_deref())
                .bind(model.description.as_deref())
                .bind(model.data_description.as_deref())
                .bind(&model.keywords)
                .bind(model.finalized)
                .bind(model.finalized_at)
                .bind(model.category.as_deref())
                .bind(model.created_at)
                .bind(model.model_key.as_deref())
                .bind(model.metrics_key.as_deref())
                .bind(model.label_mapping_key.as_deref())
                .bind(model.feature_columns_key.as_deref())
                .fetch_one(conn)
                .await
        }
    }
}

async fn record_target(
    tx: &mut Transaction<'_, Postgres>,
    mapping: &EntityMapping,
    target_id: i64,
) -> CopyResult<bool> {
    let result = sqlx::query(RECORD_TARGET_SQL)
        .bind(mapping.id)
        .bind(target_id)
        .execute(&mut **tx)
        .await
        .map_err(query_failed("copy_mappings.record_target"))?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl PipelineCatalog for PgCopyStore {
    async fn load_row(&self, entity_type: EntityType, id: i64) -> CopyResult<Option<EntityRow>> {
        self.fetch_row(entity_type, id)
            .await?
            .transpose()
            .map_err(decode_failed("pipeline.load"))
    }

    async fn model_for_training(&self, training_id: i64) -> CopyResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(SELECT_MODEL_FOR_TRAINING_SQL)
            .bind(training_id)
            .fetch_optional(self.pool())
            .await
            .map_err(query_failed("models.for_training"))
    }

    async fn persist_target(&self, mapping: &EntityMapping, row: &EntityRow) -> CopyResult<i64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(query_failed("pipeline.persist.begin"))?;
        let target_id = insert_row(&mut tx, row)
            .await
            .map_err(query_failed("pipeline.persist.insert"))?;
        if !record_target(&mut tx, mapping, target_id).await? {
            // Dropping the transaction rolls back the inserted row.
            return Err(CopyError::ConcurrentModification {
                resource: "mapping",
                id: mapping.id.to_string(),
                expected: CopyStatus::InProgress,
            });
        }
        tx.commit()
            .await
            .map_err(query_failed("pipeline.persist.commit"))?;
        debug!(
            mapping_id = mapping.id,
            entity_type = %row.entity_type(),
            target_id,
            "target row persisted"
        );
        Ok(target_id)
    }
}
