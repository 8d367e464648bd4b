//! Entity types participating in a pipeline copy and the precedence table between them.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Closed set of entity kinds a pipeline copy touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Uploaded training dataset with its file blob.
    Dataset,
    /// Column configuration applied to a dataset.
    DatasetConfig,
    /// Built-in algorithm configuration.
    AlgorithmConfig,
    /// Custom (user-supplied) algorithm configuration with an optional parameters file.
    CustomAlgorithmConfig,
    /// Training run; the root of a copy request.
    Training,
    /// Model produced by a training run, with artifact blobs.
    Model,
}

impl EntityType {
    /// Every entity type in a valid topological order.
    pub const ALL: [Self; 6] = [
        Self::Dataset,
        Self::DatasetConfig,
        Self::AlgorithmConfig,
        Self::CustomAlgorithmConfig,
        Self::Training,
        Self::Model,
    ];

    /// Stable label used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::DatasetConfig => "dataset_config",
            Self::AlgorithmConfig => "algorithm_config",
            Self::CustomAlgorithmConfig => "custom_algorithm_config",
            Self::Training => "training",
            Self::Model => "model",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == label)
    }

    /// Entity types an instance of `self` may reference as a parent.
    ///
    /// A training needs its dataset configuration plus at least one of the two
    /// algorithm configuration kinds; both may be present.
    #[must_use]
    pub const fn parents(self) -> &'static [Self] {
        match self {
            Self::Dataset | Self::AlgorithmConfig | Self::CustomAlgorithmConfig => &[],
            Self::DatasetConfig => &[Self::Dataset],
            Self::Training => &[
                Self::DatasetConfig,
                Self::AlgorithmConfig,
                Self::CustomAlgorithmConfig,
            ],
            Self::Model => &[Self::Training],
        }
    }

    /// Whether `parent` is a permitted direct parent of `self`.
    #[must_use]
    pub fn accepts_parent(self, parent: Self) -> bool {
        self.parents().contains(&parent)
    }

    /// Position of the type in [`EntityType::ALL`].
    #[must_use]
    pub const fn rank(self) -> usize {
        match self {
            Self::Dataset => 0,
            Self::DatasetConfig => 1,
            Self::AlgorithmConfig => 2,
            Self::CustomAlgorithmConfig => 3,
            Self::Training => 4,
            Self::Model => 5,
        }
    }

    /// Blob roles carried by rows of this type.
    #[must_use]
    pub const fn blob_roles(self) -> &'static [BlobRole] {
        match self {
            Self::Dataset => &[BlobRole::DatasetFile],
            Self::CustomAlgorithmConfig => &[BlobRole::ParametersFile],
            Self::Model => &[
                BlobRole::ModelArtifact,
                BlobRole::Metrics,
                BlobRole::LabelMapping,
                BlobRole::FeatureColumns,
            ],
            Self::DatasetConfig | Self::AlgorithmConfig | Self::Training => &[],
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Role a blob plays for the entity that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobRole {
    /// Dataset file contents.
    DatasetFile,
    /// Custom algorithm parameters file.
    ParametersFile,
    /// Serialized trained model.
    ModelArtifact,
    /// Evaluation metrics document.
    Metrics,
    /// Label mapping used for classification outputs.
    LabelMapping,
    /// Feature column list captured at training time.
    FeatureColumns,
}

impl BlobRole {
    /// Stable label used in object keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatasetFile => "dataset_file",
            Self::ParametersFile => "parameters_file",
            Self::ModelArtifact => "model_artifact",
            Self::Metrics => "metrics",
            Self::LabelMapping => "label_mapping",
            Self::FeatureColumns => "feature_columns",
        }
    }
}

impl Display for BlobRole {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Bucket names blobs are read from and written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buckets {
    /// Training dataset files.
    pub datasets: String,
    /// Model artifacts, label mappings, and feature columns.
    pub models: String,
    /// Model metrics documents.
    pub metrics: String,
    /// Custom algorithm parameter files.
    pub parameters: String,
}

impl Buckets {
    /// Bucket that stores blobs of the given role.
    #[must_use]
    pub fn for_role(&self, role: BlobRole) -> &str {
        match role {
            BlobRole::DatasetFile => &self.datasets,
            BlobRole::ParametersFile => &self.parameters,
            BlobRole::Metrics => &self.metrics,
            BlobRole::ModelArtifact | BlobRole::LabelMapping | BlobRole::FeatureColumns => {
                &self.models
            }
        }
    }
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            datasets: "datasets".to_string(),
            models: "models".to_string(),
            metrics: "metrics".to_string(),
            parameters: "parameters".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_topologically_ordered() {
        for (index, kind) in EntityType::ALL.into_iter().enumerate() {
            assert_eq!(kind.rank(), index);
            for parent in kind.parents() {
                assert!(parent.rank() < kind.rank(), "{parent} must precede {kind}");
            }
        }
    }

    #[test]
    fn labels_parse_back() {
        for kind in EntityType::ALL {
            assert_eq!(EntityType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityType::parse("prediction"), None);
    }

    #[test]
    fn training_accepts_either_algorithm_kind() {
        assert!(EntityType::Training.accepts_parent(EntityType::AlgorithmConfig));
        assert!(EntityType::Training.accepts_parent(EntityType::CustomAlgorithmConfig));
        assert!(!EntityType::Training.accepts_parent(EntityType::Dataset));
        assert!(!EntityType::Model.accepts_parent(EntityType::DatasetConfig));
    }

    #[test]
    fn buckets_route_roles() {
        let buckets = Buckets::default();
        assert_eq!(buckets.for_role(BlobRole::DatasetFile), "datasets");
        assert_eq!(buckets.for_role(BlobRole::Metrics), "metrics");
        assert_eq!(buckets.for_role(BlobRole::LabelMapping), "models");
        assert_eq!(buckets.for_role(BlobRole::ParametersFile), "parameters");
        assert_eq!(EntityType::Model.blob_roles().len(), 4);
        assert!(EntityType::Training.blob_roles().is_empty());
    }
}
