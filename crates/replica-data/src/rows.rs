//! Row structs decoded by `sqlx` and their conversion into domain types.

use chrono::{DateTime, Utc};
use replica_core::{
    AlgorithmConfig, BlobTransfer, CopyOperation, CopyPlan, CopyStatus, CustomAlgorithmConfig,
    Dataset, DatasetConfig, EntityMapping, EntityType, HistoryAction, HistoryEntry, Model,
    TargetOwner, Training,
};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{DataError, Result};

fn parse_status(label: &str) -> Result<CopyStatus> {
    CopyStatus::parse(label).ok_or_else(|| DataError::decode("status", label))
}

fn owner(user: Option<Uuid>, group: Option<i64>, id: i64) -> Result<TargetOwner> {
    TargetOwner::from_columns(user, group).ok_or_else(|| DataError::decode("owner", id.to_string()))
}

#[derive(Debug, FromRow)]
pub(crate) struct OperationRow {
    id: Uuid,
    source_training_id: i64,
    target_training_id: Option<i64>,
    initiated_by: Uuid,
    target_user_id: Option<Uuid>,
    target_group_id: Option<i64>,
    comment: Option<String>,
    status: String,
    error_message: Option<String>,
    plan: Json<CopyPlan>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for CopyOperation {
    type Error = DataError;

    fn try_from(row: OperationRow) -> Result<Self> {
        let target = TargetOwner::from_columns(row.target_user_id, row.target_group_id)
            .ok_or_else(|| DataError::decode("target_owner", row.id.to_string()))?;
        Ok(Self {
            id: row.id,
            source_training_id: row.source_training_id,
            target_training_id: row.target_training_id,
            initiated_by: row.initiated_by,
            target,
            comment: row.comment,
            status: parse_status(&row.status)?,
            error_message: row.error_message,
            plan: row.plan.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MappingRow {
    id: i64,
    operation_id: Uuid,
    entity_type: String,
    source_entity_id: i64,
    target_entity_id: Option<i64>,
    blobs: Json<Vec<BlobTransfer>>,
    status: String,
    error_message: Option<String>,
    attempts: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MappingRow> for EntityMapping {
    type Error = DataError;

    fn try_from(row: MappingRow) -> Result<Self> {
        let entity_type = EntityType::parse(&row.entity_type)
            .ok_or_else(|| DataError::decode("entity_type", row.entity_type.clone()))?;
        Ok(Self {
            id: row.id,
            operation_id: row.operation_id,
            entity_type,
            source_entity_id: row.source_entity_id,
            target_entity_id: row.target_entity_id,
            blobs: row.blobs.0,
            status: parse_status(&row.status)?,
            error_message: row.error_message,
            attempts: row.attempts,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct HistoryRow {
    id: i64,
    operation_id: Uuid,
    action: String,
    actor: Option<Uuid>,
    recorded_at: DateTime<Utc>,
    detail: Option<String>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DataError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let action = HistoryAction::parse(&row.action)
            .ok_or_else(|| DataError::decode("action", row.action.clone()))?;
        Ok(Self {
            id: row.id,
            operation_id: row.operation_id,
            action,
            actor: row.actor,
            recorded_at: row.recorded_at,
            detail: row.detail,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DatasetRow {
    id: i64,
    owner_user_id: Option<Uuid>,
    owner_group_id: Option<i64>,
    original_file_name: String,
    file_name: String,
    file_key: String,
    file_size: i64,
    content_type: String,
    accessibility: String,
    category: Option<String>,
    description: Option<String>,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<DatasetRow> for Dataset {
    type Error = DataError;

    fn try_from(row: DatasetRow) -> Result<Self> {
        Ok(Self {
            owner: owner(row.owner_user_id, row.owner_group_id, row.id)?,
            original_file_name: row.original_file_name,
            file_name: row.file_name,
            file_key: row.file_key,
            file_size: row.file_size,
            content_type: row.content_type,
            accessibility: row.accessibility,
            category: row.category,
            description: row.description,
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DatasetConfigRow {
    dataset_id: i64,
    basic_attribute_columns: Option<String>,
    target_column: Option<String>,
    status: String,
    uploaded_at: DateTime<Utc>,
}

impl From<DatasetConfigRow> for DatasetConfig {
    fn from(row: DatasetConfigRow) -> Self {
        Self {
            dataset_id: row.dataset_id,
            basic_attribute_columns: row.basic_attribute_columns,
            target_column: row.target_column,
            status: row.status,
            uploaded_at: row.uploaded_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AlgorithmConfigRow {
    id: i64,
    owner_user_id: Option<Uuid>,
    owner_group_id: Option<i64>,
    algorithm_id: i64,
    options: Option<String>,
    algorithm_type: Option<String>,
}

impl TryFrom<AlgorithmConfigRow> for AlgorithmConfig {
    type Error = DataError;

    fn try_from(row: AlgorithmConfigRow) -> Result<Self> {
        Ok(Self {
            owner: owner(row.owner_user_id, row.owner_group_id, row.id)?,
            algorithm_id: row.algorithm_id,
            options: row.options,
            algorithm_type: row.algorithm_type,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CustomAlgorithmConfigRow {
    id: i64,
    owner_user_id: Option<Uuid>,
    owner_group_id: Option<i64>,
    custom_algorithm_id: i64,
    parameters_key: Option<String>,
}

impl TryFrom<CustomAlgorithmConfigRow> for CustomAlgorithmConfig {
    type Error = DataError;

    fn try_from(row: CustomAlgorithmConfigRow) -> Result<Self> {
        Ok(Self {
            owner: owner(row.owner_user_id, row.owner_group_id, row.id)?,
            custom_algorithm_id: row.custom_algorithm_id,
            parameters_key: row.parameters_key,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TrainingRow {
    id: i64,
    owner_user_id: Option<Uuid>,
    owner_group_id: Option<i64>,
    dataset_configuration_id: Option<i64>,
    algorithm_configuration_id: Option<i64>,
    custom_algorithm_configuration_id: Option<i64>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    results: Option<String>,
}

impl TryFrom<TrainingRow> for Training {
    type Error = DataError;

    fn try_from(row: TrainingRow) -> Result<Self> {
        Ok(Self {
            owner: owner(row.owner_user_id, row.owner_group_id, row.id)?,
            dataset_config_id: row.dataset_configuration_id,
            algorithm_config_id: row.algorithm_configuration_id,
            custom_algorithm_config_id: row.custom_algorithm_configuration_id,
            status: row.status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            results: row.results,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ModelRow {
    training_id: i64,
    model_type: Option<String>,
    status: String,
    accessibility: String,
    name: Option<String>,
    description: Option<String>,
    data_description: Option<String>,
    keywords: Vec<String>,
    finalized: bool,
    finalized_at: Option<DateTime<Utc>>,
    category: Option<String>,
    created_at: DateTime<Utc>,
    model_key: Option<String>,
    metrics_key: Option<String>,
    label_mapping_key: Option<String>,
    feature_columns_key: Option<String>,
}

impl From<ModelRow> for Model {
    fn from(row: ModelRow) -> Self {
        Self {
            training_id: row.training_id,
            model_type: row.model_type,
            status: row.status,
            accessibility: row.accessibility,
            name: row.name,
            description: row.description,
            data_description: row.data_description,
            keywords: row.keywords,
            finalized: row.finalized,
            finalized_at: row.finalized_at,
            category: row.category,
            created_at: row.created_at,
            model_key: row.model_key,
            metrics_key: row.metrics_key,
            label_mapping_key: row.label_mapping_key,
            feature_columns_key: row.feature_columns_key,
        }
    }
}
