//! Environment parsing and validation.

use std::path::PathBuf;
use std::time::Duration;

use replica_core::Buckets;
use tracing::debug;

use crate::defaults::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_CONNECTIONS, DEFAULT_QUEUE_DEPTH, DEFAULT_STALE_AFTER_SECS,
    DEFAULT_STORAGE_ROOT, DEFAULT_WORKERS, ENV_BUCKET_DATASETS, ENV_BUCKET_METRICS,
    ENV_BUCKET_MODELS, ENV_BUCKET_PARAMETERS, ENV_DATABASE_URL, ENV_DB_MAX_CONNECTIONS,
    ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_QUEUE_DEPTH, ENV_STALE_AFTER_SECS, ENV_STORAGE,
    ENV_STORAGE_ROOT, ENV_WORKERS, MAX_WORKERS,
};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    DatabaseSettings, EngineSettings, LogSettings, LogStyle, ReplicaConfig, StorageBackend,
    StorageSettings,
};

impl ReplicaConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` is missing or a value fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` is missing or a value fails validation.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let url = get(ENV_DATABASE_URL).ok_or(ConfigError::MissingEnv {
            name: ENV_DATABASE_URL,
        })?;
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ConfigError::InvalidField {
                field: ENV_DATABASE_URL,
                reason: "must be a postgres connection string",
                value: None,
            });
        }
        let max_connections = match get(ENV_DB_MAX_CONNECTIONS) {
            Some(raw) => parse_bounded(ENV_DB_MAX_CONNECTIONS, &raw, 1, 1_000)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let workers = match get(ENV_WORKERS) {
            Some(raw) => parse_bounded(ENV_WORKERS, &raw, 1, MAX_WORKERS)?,
            None => DEFAULT_WORKERS,
        };
        let queue_depth = match get(ENV_QUEUE_DEPTH) {
            Some(raw) => parse_bounded(ENV_QUEUE_DEPTH, &raw, 1, 65_536)?,
            None => DEFAULT_QUEUE_DEPTH,
        };
        let stale_after_secs = match get(ENV_STALE_AFTER_SECS) {
            Some(raw) => parse_bounded(ENV_STALE_AFTER_SECS, &raw, 30, 86_400)?,
            None => DEFAULT_STALE_AFTER_SECS,
        };

        let backend = match get(ENV_STORAGE).as_deref() {
            None | Some("fs") => StorageBackend::Filesystem {
                root: get(ENV_STORAGE_ROOT)
                    .map_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT), PathBuf::from),
            },
            Some("s3") => StorageBackend::S3,
            Some(other) => {
                return Err(ConfigError::invalid(
                    ENV_STORAGE,
                    "must be `fs` or `s3`",
                    other,
                ));
            }
        };
        let defaults = Buckets::default();
        let buckets = Buckets {
            datasets: bucket_name(ENV_BUCKET_DATASETS, get(ENV_BUCKET_DATASETS), defaults.datasets)?,
            models: bucket_name(ENV_BUCKET_MODELS, get(ENV_BUCKET_MODELS), defaults.models)?,
            metrics: bucket_name(ENV_BUCKET_METRICS, get(ENV_BUCKET_METRICS), defaults.metrics)?,
            parameters: bucket_name(
                ENV_BUCKET_PARAMETERS,
                get(ENV_BUCKET_PARAMETERS),
                defaults.parameters,
            )?,
        };

        let style = match get(ENV_LOG_FORMAT).as_deref() {
            None => None,
            Some("json") => Some(LogStyle::Json),
            Some("pretty") => Some(LogStyle::Pretty),
            Some(other) => {
                return Err(ConfigError::invalid(
                    ENV_LOG_FORMAT,
                    "must be `json` or `pretty`",
                    other,
                ));
            }
        };
        let level = get(ENV_LOG_LEVEL).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let config = Self {
            database: DatabaseSettings {
                url,
                max_connections,
            },
            engine: EngineSettings {
                workers,
                queue_depth,
                stale_after: Duration::from_secs(stale_after_secs),
            },
            storage: StorageSettings { backend, buckets },
            logging: LogSettings { level, style },
        };
        debug!(
            workers = config.engine.workers,
            queue_depth = config.engine.queue_depth,
            stale_after_secs,
            "replication configuration loaded"
        );
        Ok(config)
    }
}

fn parse_bounded<T>(field: &'static str, raw: &str, min: T, max: T) -> ConfigResult<T>
where
    T: std::str::FromStr + PartialOrd + Copy,
{
    let value: T = raw
        .parse()
        .map_err(|_| ConfigError::invalid(field, "must be a positive integer", raw))?;
    if value < min || value > max {
        return Err(ConfigError::invalid(field, "out of range", raw));
    }
    Ok(value)
}

fn bucket_name(
    field: &'static str,
    raw: Option<String>,
    default: String,
) -> ConfigResult<String> {
    let Some(name) = raw else {
        return Ok(default);
    };
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(ConfigError::invalid(field, "not a valid bucket name", &name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config = ReplicaConfig::from_lookup(lookup(&[(
            ENV_DATABASE_URL,
            "postgres://localhost/replica",
        )]))
        .expect("config loads");
        assert_eq!(config.database.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.engine.workers, DEFAULT_WORKERS);
        assert_eq!(config.engine.stale_after, Duration::from_secs(900));
        assert_eq!(config.storage.buckets, Buckets::default());
        assert_eq!(
            config.storage.backend,
            StorageBackend::Filesystem {
                root: PathBuf::from(DEFAULT_STORAGE_ROOT)
            }
        );
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.style.is_none());
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = ReplicaConfig::from_lookup(lookup(&[])).expect_err("database url required");
        assert!(matches!(
            err,
            ConfigError::MissingEnv {
                name: ENV_DATABASE_URL
            }
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ReplicaConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgresql://db/replica"),
            (ENV_WORKERS, "8"),
            (ENV_STORAGE, "s3"),
            (ENV_BUCKET_MODELS, "ml-models"),
            (ENV_LOG_FORMAT, "json"),
            (ENV_STALE_AFTER_SECS, " 120 "),
        ]))
        .expect("config loads");
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.stale_after, Duration::from_secs(120));
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.buckets.models, "ml-models");
        assert_eq!(config.logging.style, Some(LogStyle::Json));
    }

    #[test]
    fn invalid_values_carry_field_and_value() {
        let err = ReplicaConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://db/replica"),
            (ENV_WORKERS, "0"),
        ]))
        .expect_err("zero workers rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: ENV_WORKERS, reason: "out of range", value: Some(ref v) } if v == "0"
        ));

        let err = ReplicaConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://db/replica"),
            (ENV_BUCKET_METRICS, "Bad_Bucket"),
        ]))
        .expect_err("bucket name rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: ENV_BUCKET_METRICS,
                ..
            }
        ));

        let err = ReplicaConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "mysql://db")]))
            .expect_err("non-postgres url rejected");
        assert!(matches!(err, ConfigError::InvalidField { value: None, .. }));
    }

    #[test]
    fn database_url_is_redacted_in_debug() {
        let config = ReplicaConfig::from_lookup(lookup(&[(
            ENV_DATABASE_URL,
            "postgres://user:secret@db/replica",
        )]))
        .expect("config loads");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }
}
