//! Relational rows of the pipeline graph, as seen by the copier.
//!
//! Rows carry only business fields, owner, and parent references; storage
//! identity is passed alongside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BlobRole, EntityType, TargetOwner};

/// Uploaded training dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Owner of the dataset.
    pub owner: TargetOwner,
    /// File name as uploaded.
    pub original_file_name: String,
    /// Stored file name.
    pub file_name: String,
    /// Object key in the datasets bucket.
    pub file_key: String,
    /// File size in bytes.
    pub file_size: i64,
    /// MIME type.
    pub content_type: String,
    /// Visibility label.
    pub accessibility: String,
    /// Category label.
    pub category: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Upload time.
    pub uploaded_at: DateTime<Utc>,
}

/// Column configuration over a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Configured dataset.
    pub dataset_id: i64,
    /// Comma-separated attribute column indexes.
    pub basic_attribute_columns: Option<String>,
    /// Target column index.
    pub target_column: Option<String>,
    /// Status label.
    pub status: String,
    /// Creation time.
    pub uploaded_at: DateTime<Utc>,
}

/// Built-in algorithm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Owner of the configuration.
    pub owner: TargetOwner,
    /// Configured algorithm.
    pub algorithm_id: i64,
    /// Algorithm option string.
    pub options: Option<String>,
    /// Algorithm type label.
    pub algorithm_type: Option<String>,
}

/// Custom algorithm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAlgorithmConfig {
    /// Owner of the configuration.
    pub owner: TargetOwner,
    /// Configured custom algorithm.
    pub custom_algorithm_id: i64,
    /// Object key of the parameters file in the parameters bucket.
    pub parameters_key: Option<String>,
}

/// Training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
    /// Owner of the run.
    pub owner: TargetOwner,
    /// Dataset configuration trained on.
    pub dataset_config_id: Option<i64>,
    /// Built-in algorithm configuration, when used.
    pub algorithm_config_id: Option<i64>,
    /// Custom algorithm configuration, when used.
    pub custom_algorithm_config_id: Option<i64>,
    /// Status label.
    pub status: String,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Result summary.
    pub results: Option<String>,
}

/// Model produced by a training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Producing training.
    pub training_id: i64,
    /// Model type label.
    pub model_type: Option<String>,
    /// Status label.
    pub status: String,
    /// Visibility label.
    pub accessibility: String,
    /// Display name.
    pub name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Description of the training data.
    pub data_description: Option<String>,
    /// Search keywords.
    pub keywords: Vec<String>,
    /// Whether the model was finalized.
    pub finalized: bool,
    /// Finalization time.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Category label.
    pub category: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Serialized model key.
    pub model_key: Option<String>,
    /// Metrics document key.
    pub metrics_key: Option<String>,
    /// Label mapping key.
    pub label_mapping_key: Option<String>,
    /// Feature columns key.
    pub feature_columns_key: Option<String>,
}

/// One row of the pipeline graph, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "row", rename_all = "snake_case")]
pub enum EntityRow {
    /// Dataset row.
    Dataset(Dataset),
    /// Dataset configuration row.
    DatasetConfig(DatasetConfig),
    /// Algorithm configuration row.
    AlgorithmConfig(AlgorithmConfig),
    /// Custom algorithm configuration row.
    CustomAlgorithmConfig(CustomAlgorithmConfig),
    /// Training row.
    Training(Training),
    /// Model row.
    Model(Model),
}

impl EntityRow {
    /// Entity type of the row.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Dataset(_) => EntityType::Dataset,
            Self::DatasetConfig(_) => EntityType::DatasetConfig,
            Self::AlgorithmConfig(_) => EntityType::AlgorithmConfig,
            Self::CustomAlgorithmConfig(_) => EntityType::CustomAlgorithmConfig,
            Self::Training(_) => EntityType::Training,
            Self::Model(_) => EntityType::Model,
        }
    }

    /// Blob keys the row references, by role. Absent keys are skipped.
    #[must_use]
    pub fn blob_keys(&self) -> Vec<(BlobRole, &str)> {
        let candidates: Vec<(BlobRole, Option<&str>)> = match self {
            Self::Dataset(row) => vec![(BlobRole::DatasetFile, Some(row.file_key.as_str()))],
            Self::CustomAlgorithmConfig(row) => {
                vec![(BlobRole::ParametersFile, row.parameters_key.as_deref())]
            }
            Self::Model(row) => vec![
                (BlobRole::ModelArtifact, row.model_key.as_deref()),
                (BlobRole::Metrics, row.metrics_key.as_deref()),
                (BlobRole::LabelMapping, row.label_mapping_key.as_deref()),
                (BlobRole::FeatureColumns, row.feature_columns_key.as_deref()),
            ],
            Self::DatasetConfig(_) | Self::AlgorithmConfig(_) | Self::Training(_) => Vec::new(),
        };
        candidates
            .into_iter()
            .filter_map(|(role, key)| key.filter(|key| !key.is_empty()).map(|key| (role, key)))
            .collect()
    }

    /// Replace the key stored for `role`. Roles the row does not carry are ignored.
    pub fn set_blob_key(&mut self, role: BlobRole, key: String) {
        match (self, role) {
            (Self::Dataset(row), BlobRole::DatasetFile) => row.file_key = key,
            (Self::CustomAlgorithmConfig(row), BlobRole::ParametersFile) => {
                row.parameters_key = Some(key);
            }
            (Self::Model(row), BlobRole::ModelArtifact) => row.model_key = Some(key),
            (Self::Model(row), BlobRole::Metrics) => row.metrics_key = Some(key),
            (Self::Model(row), BlobRole::LabelMapping) => row.label_mapping_key = Some(key),
            (Self::Model(row), BlobRole::FeatureColumns) => row.feature_columns_key = Some(key),
            _ => {}
        }
    }

    /// Parent references held by the row's foreign keys.
    #[must_use]
    pub fn parent_ids(&self) -> Vec<(EntityType, i64)> {
        match self {
            Self::DatasetConfig(row) => vec![(EntityType::Dataset, row.dataset_id)],
            Self::Training(row) => [
                (EntityType::DatasetConfig, row.dataset_config_id),
                (EntityType::AlgorithmConfig, row.algorithm_config_id),
                (EntityType::CustomAlgorithmConfig, row.custom_algorithm_config_id),
            ]
            .into_iter()
            .filter_map(|(kind, id)| id.map(|id| (kind, id)))
            .collect(),
            Self::Model(row) => vec![(EntityType::Training, row.training_id)],
            Self::Dataset(_) | Self::AlgorithmConfig(_) | Self::CustomAlgorithmConfig(_) => {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn model() -> Model {
        Model {
            training_id: 3,
            model_type: Some("classification".into()),
            status: "finished".into(),
            accessibility: "private".into(),
            name: Some("iris".into()),
            description: None,
            data_description: None,
            keywords: vec!["flowers".into()],
            finalized: true,
            finalized_at: Some(Utc::now()),
            category: None,
            created_at: Utc::now(),
            model_key: Some("models/iris.model".into()),
            metrics_key: Some("metrics/iris.json".into()),
            label_mapping_key: None,
            feature_columns_key: Some(String::new()),
        }
    }

    #[test]
    fn blob_keys_skip_missing_and_empty() {
        let row = EntityRow::Model(model());
        let keys = row.blob_keys();
        assert_eq!(
            keys,
            vec![
                (BlobRole::ModelArtifact, "models/iris.model"),
                (BlobRole::Metrics, "metrics/iris.json"),
            ]
        );
    }

    #[test]
    fn set_blob_key_updates_matching_role_only() {
        let mut row = EntityRow::Model(model());
        row.set_blob_key(BlobRole::LabelMapping, "copies/labels.json".into());
        row.set_blob_key(BlobRole::DatasetFile, "ignored".into());
        let EntityRow::Model(model) = row else {
            panic!("variant changed");
        };
        assert_eq!(model.label_mapping_key.as_deref(), Some("copies/labels.json"));
        assert_eq!(model.model_key.as_deref(), Some("models/iris.model"));
    }

    #[test]
    fn training_parents_include_present_keys() {
        let row = EntityRow::Training(Training {
            owner: TargetOwner::User(Uuid::nil()),
            dataset_config_id: Some(2),
            algorithm_config_id: None,
            custom_algorithm_config_id: Some(9),
            status: "completed".into(),
            started_at: None,
            finished_at: None,
            results: None,
        });
        assert_eq!(row.entity_type(), EntityType::Training);
        assert_eq!(
            row.parent_ids(),
            vec![
                (EntityType::DatasetConfig, 2),
                (EntityType::CustomAlgorithmConfig, 9)
            ]
        );
    }
}
