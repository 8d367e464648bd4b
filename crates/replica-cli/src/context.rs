//! Wiring from configuration to an orchestrator, plus the CLI error type.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use replica_config::{ConfigError, ReplicaConfig, StorageBackend};
use replica_core::{CopyError, ObjectStore};
use replica_data::PgCopyStore;
use replica_engine::{CopyOrchestrator, OrchestratorOptions};
use replica_storage::FsObjectStore;
use replica_telemetry::Metrics;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let message = match &err {
            ConfigError::MissingEnv { name } => format!("{err}: {name} is not set"),
            ConfigError::InvalidField {
                field,
                reason,
                value: Some(value),
            } => format!("{err}: {field} {reason} (got {value:?})"),
            ConfigError::InvalidField {
                field,
                reason,
                value: None,
            } => format!("{err}: {field} {reason}"),
        };
        Self::Validation(message)
    }
}

impl From<CopyError> for CliError {
    fn from(err: CopyError) -> Self {
        match &err {
            CopyError::NotFound { resource, id } => {
                Self::Validation(format!("{resource} {id} not found"))
            }
            CopyError::Conflict {
                source_training_id,
                owner,
                operation_id,
            } => {
                let running = operation_id
                    .map(|id| format!(" (operation {id})"))
                    .unwrap_or_default();
                Self::Validation(format!(
                    "{err}: training {source_training_id} is already being copied to {owner}{running}"
                ))
            }
            CopyError::Structural {
                entity_type,
                source_id,
                reason,
            } => Self::Validation(format!("{err}: {reason} ({entity_type} {source_id})")),
            CopyError::AlreadyCompleted { operation_id } => {
                Self::Validation(format!("operation {operation_id} already completed"))
            }
            _ => Self::Failure(anyhow::Error::new(err)),
        }
    }
}

/// Application context passed to command handlers.
pub(crate) struct AppContext {
    pub(crate) config: ReplicaConfig,
    pub(crate) orchestrator: Arc<CopyOrchestrator>,
}

impl AppContext {
    /// Connect to the database, run migrations, and build the orchestrator.
    pub(crate) async fn connect(config: ReplicaConfig) -> CliResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("failed to connect to the database")
            .map_err(CliError::failure)?;
        let store = Arc::new(
            PgCopyStore::new(pool)
                .await
                .context("failed to prepare the replication schema")
                .map_err(CliError::failure)?,
        );
        let objects = object_store(&config.storage.backend).await?;
        let metrics = Metrics::new()
            .map_err(|err| CliError::failure(anyhow!("failed to register metrics: {err}")))?;

        let orchestrator = CopyOrchestrator::new(
            store.clone(),
            objects,
            store,
            OrchestratorOptions {
                buckets: config.storage.buckets.clone(),
                stale_after: config.engine.stale_after,
            },
            metrics,
        );
        info!(
            workers = config.engine.workers,
            stale_after_secs = config.engine.stale_after.as_secs(),
            "replication engine ready"
        );
        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

async fn object_store(backend: &StorageBackend) -> CliResult<Arc<dyn ObjectStore>> {
    match backend {
        StorageBackend::Filesystem { root } => {
            info!(root = %root.display(), "using filesystem object store");
            Ok(Arc::new(FsObjectStore::new(root.clone())))
        }
        StorageBackend::S3 => s3_store().await,
    }
}

#[cfg(feature = "s3")]
async fn s3_store() -> CliResult<Arc<dyn ObjectStore>> {
    Ok(Arc::new(replica_storage::S3ObjectStore::from_env().await))
}

#[cfg(not(feature = "s3"))]
#[allow(clippy::unused_async)]
async fn s3_store() -> CliResult<Arc<dyn ObjectStore>> {
    Err(CliError::validation(
        "REPLICA_STORAGE=s3 requires a build with the `s3` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::EntityType;
    use uuid::Uuid;

    #[test]
    fn domain_errors_are_validation_failures() {
        let id = Uuid::nil();
        let conflict = CliError::from(CopyError::Conflict {
            source_training_id: 4,
            owner: "group:2".into(),
            operation_id: Some(id),
        });
        assert_eq!(conflict.exit_code(), 2);
        assert!(conflict.display_message().contains("training 4"));
        assert!(conflict.display_message().contains(&id.to_string()));

        let structural = CliError::from(CopyError::Structural {
            entity_type: EntityType::DatasetConfig,
            source_id: 9,
            reason: "dataset configuration missing",
        });
        assert_eq!(
            structural.display_message(),
            "pipeline structure incomplete: dataset configuration missing (dataset_config 9)"
        );

        let missing = CliError::from(CopyError::not_found("copy operation", id));
        assert_eq!(missing.exit_code(), 2);
    }

    #[test]
    fn store_errors_are_operational_failures() {
        let err = CliError::from(CopyError::store(
            "copy_operations.select",
            std::io::Error::other("connection refused"),
        ));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.display_message(),
            "copy store failure: connection refused"
        );
    }

    #[test]
    fn config_errors_name_the_variable() {
        let err = CliError::from(ConfigError::MissingEnv {
            name: "DATABASE_URL",
        });
        assert_eq!(err.exit_code(), 2);
        assert!(err.display_message().contains("DATABASE_URL"));
    }

    #[tokio::test]
    async fn filesystem_backend_needs_no_credentials() {
        let backend = StorageBackend::Filesystem {
            root: std::env::temp_dir().join("replica-cli-test"),
        };
        assert!(object_store(&backend).await.is_ok());
    }
}
