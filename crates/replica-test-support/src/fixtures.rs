//! Test fixtures and environment helpers.

use std::path::Path;
use std::process::Command;

use chrono::{TimeZone, Utc};
use replica_core::{
    AlgorithmConfig, CustomAlgorithmConfig, Dataset, DatasetConfig, EntityRow, Model,
    TargetOwner, Training,
};

use crate::mocks::{MemoryCopyStore, MemoryObjectStore};

/// Returns `true` if a Docker daemon is reachable for integration tests.
#[must_use]
pub fn docker_available() -> bool {
    docker_available_with_host(std::env::var("DOCKER_HOST").ok())
}

fn docker_available_with_host(host: Option<String>) -> bool {
    if let Some(host) = host {
        if let Some(path) = host.strip_prefix("unix://") {
            return Path::new(path).exists();
        }
        return true;
    }

    Path::new("/var/run/docker.sock").exists()
        || Command::new("docker")
            .args(["info"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
}

/// Shape of the source pipeline seeded by [`seed_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineShape {
    /// Owner of the source rows.
    pub owner: TargetOwner,
    /// Key of the dataset file in the datasets bucket.
    pub dataset_key: String,
    /// Seed a built-in algorithm configuration.
    pub algorithm_config: bool,
    /// Seed a custom algorithm configuration with this parameters key.
    pub custom_parameters_key: Option<String>,
    /// Seed a model; `Some(key)` also gives it an artifact blob.
    pub model: Option<Option<String>>,
}

impl PipelineShape {
    /// Dataset with one blob, a built-in algorithm configuration, a training, and a
    /// model without blobs.
    #[must_use]
    pub fn standard(owner: TargetOwner) -> Self {
        Self {
            owner,
            dataset_key: "k1".to_string(),
            algorithm_config: true,
            custom_parameters_key: None,
            model: Some(None),
        }
    }

    /// Give the model an artifact stored under `key`.
    #[must_use]
    pub fn with_model_artifact(mut self, key: &str) -> Self {
        self.model = Some(Some(key.to_string()));
        self
    }

    /// Add a custom algorithm configuration whose parameters live under `key`.
    #[must_use]
    pub fn with_custom_algorithm(mut self, key: &str) -> Self {
        self.custom_parameters_key = Some(key.to_string());
        self
    }

    /// Drop the built-in algorithm configuration.
    #[must_use]
    pub const fn without_algorithm_config(mut self) -> Self {
        self.algorithm_config = false;
        self
    }

    /// Drop the model.
    #[must_use]
    pub fn without_model(mut self) -> Self {
        self.model = None;
        self
    }
}

/// Identifiers of the rows seeded by [`seed_pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededPipeline {
    /// Dataset id.
    pub dataset_id: i64,
    /// Dataset configuration id.
    pub dataset_config_id: i64,
    /// Built-in algorithm configuration id, when seeded.
    pub algorithm_config_id: Option<i64>,
    /// Custom algorithm configuration id, when seeded.
    pub custom_algorithm_config_id: Option<i64>,
    /// Training id.
    pub training_id: i64,
    /// Model id, when seeded.
    pub model_id: Option<i64>,
}

/// Seed a source pipeline into the in-memory store and its blobs into `objects`.
pub async fn seed_pipeline(
    store: &MemoryCopyStore,
    objects: &MemoryObjectStore,
    shape: &PipelineShape,
) -> SeededPipeline {
    let seeded_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap_or_default();

    objects.put("datasets", &shape.dataset_key, b"a,b,c\n1,2,3\n").await;
    let dataset_id = store
        .insert_source(EntityRow::Dataset(Dataset {
            owner: shape.owner,
            original_file_name: "iris.csv".to_string(),
            file_name: "iris.csv".to_string(),
            file_key: shape.dataset_key.clone(),
            file_size: 12,
            content_type: "text/csv".to_string(),
            accessibility: "private".to_string(),
            category: Some("tabular".to_string()),
            description: Some("iris measurements".to_string()),
            uploaded_at: seeded_at,
        }))
        .await;
    let dataset_config_id = store
        .insert_source(EntityRow::DatasetConfig(DatasetConfig {
            dataset_id,
            basic_attribute_columns: Some("0,1,2".to_string()),
            target_column: Some("3".to_string()),
            status: "ready".to_string(),
            uploaded_at: seeded_at,
        }))
        .await;

    let algorithm_config_id = if shape.algorithm_config {
        Some(
            store
                .insert_source(EntityRow::AlgorithmConfig(AlgorithmConfig {
                    owner: shape.owner,
                    algorithm_id: 7,
                    options: Some("-C 0.25".to_string()),
                    algorithm_type: Some("classification".to_string()),
                }))
                .await,
        )
    } else {
        None
    };

    let custom_algorithm_config_id = match &shape.custom_parameters_key {
        Some(key) => {
            objects.put("parameters", key, b"{\"depth\": 4}").await;
            Some(
                store
                    .insert_source(EntityRow::CustomAlgorithmConfig(CustomAlgorithmConfig {
                        owner: shape.owner,
                        custom_algorithm_id: 11,
                        parameters_key: Some(key.clone()),
                    }))
                    .await,
            )
        }
        None => None,
    };

    let training_id = store
        .insert_source(EntityRow::Training(Training {
            owner: shape.owner,
            dataset_config_id: Some(dataset_config_id),
            algorithm_config_id,
            custom_algorithm_config_id,
            status: "finished".to_string(),
            started_at: Some(seeded_at),
            finished_at: Some(seeded_at),
            results: Some("accuracy=0.93".to_string()),
        }))
        .await;

    let model_id = match &shape.model {
        Some(artifact) => {
            if let Some(key) = artifact {
                objects.put("models", key, b"\x00model-bytes").await;
            }
            Some(
                store
                    .insert_source(EntityRow::Model(Model {
                        training_id,
                        model_type: Some("j48".to_string()),
                        status: "ready".to_string(),
                        accessibility: "private".to_string(),
                        name: Some("iris tree".to_string()),
                        description: None,
                        data_description: None,
                        keywords: vec!["iris".to_string()],
                        finalized: true,
                        finalized_at: Some(seeded_at),
                        category: None,
                        created_at: seeded_at,
                        model_key: artifact.clone(),
                        metrics_key: None,
                        label_mapping_key: None,
                        feature_columns_key: None,
                    }))
                    .await,
            )
        }
        None => None,
    };

    SeededPipeline {
        dataset_id,
        dataset_config_id,
        algorithm_config_id,
        custom_algorithm_config_id,
        training_id,
        model_id,
    }
}
