//! Typed configuration sections.

use std::path::PathBuf;
use std::time::Duration;

use replica_core::Buckets;

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Relational store.
    pub database: DatabaseSettings,
    /// Worker pool and claim behaviour.
    pub engine: EngineSettings,
    /// Object store.
    pub storage: StorageSettings,
    /// Logging output.
    pub logging: LogSettings,
}

/// Relational store settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Connection string.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DatabaseSettings")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Concurrent operations.
    pub workers: usize,
    /// Queue capacity in front of the workers.
    pub queue_depth: usize,
    /// Age after which an `IN_PROGRESS` claim is considered abandoned.
    pub stale_after: Duration,
}

/// Object-store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Backend selection.
    pub backend: StorageBackend,
    /// Bucket names per blob kind.
    pub buckets: Buckets,
}

/// Supported object-store backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Buckets are directories below `root`.
    Filesystem {
        /// Root directory.
        root: PathBuf,
    },
    /// S3-compatible store configured through the standard AWS environment.
    S3,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Explicit output style; inferred from the build when `None`.
    pub style: Option<LogStyle>,
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// Structured JSON lines.
    Json,
    /// Human-readable lines.
    Pretty,
}
