//! Defaults and environment variable names.

/// Connection string for the relational store.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Pool size.
pub const ENV_DB_MAX_CONNECTIONS: &str = "REPLICA_DB_MAX_CONNECTIONS";
/// Number of copy workers.
pub const ENV_WORKERS: &str = "REPLICA_WORKERS";
/// Capacity of the worker queue.
pub const ENV_QUEUE_DEPTH: &str = "REPLICA_QUEUE_DEPTH";
/// Seconds after which an unrefreshed `IN_PROGRESS` claim may be taken over.
pub const ENV_STALE_AFTER_SECS: &str = "REPLICA_STALE_AFTER_SECS";
/// Object-store backend (`fs` or `s3`).
pub const ENV_STORAGE: &str = "REPLICA_STORAGE";
/// Root directory of the filesystem backend.
pub const ENV_STORAGE_ROOT: &str = "REPLICA_STORAGE_ROOT";
/// Dataset bucket name.
pub const ENV_BUCKET_DATASETS: &str = "REPLICA_BUCKET_DATASETS";
/// Model bucket name.
pub const ENV_BUCKET_MODELS: &str = "REPLICA_BUCKET_MODELS";
/// Metrics bucket name.
pub const ENV_BUCKET_METRICS: &str = "REPLICA_BUCKET_METRICS";
/// Parameters bucket name.
pub const ENV_BUCKET_PARAMETERS: &str = "REPLICA_BUCKET_PARAMETERS";
/// Log level.
pub const ENV_LOG_LEVEL: &str = "REPLICA_LOG_LEVEL";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "REPLICA_LOG_FORMAT";

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// Default worker count.
pub const DEFAULT_WORKERS: usize = 4;
/// Upper bound on workers.
pub const MAX_WORKERS: usize = 64;
/// Default queue capacity.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;
/// Default stale-claim threshold in seconds.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 900;
/// Default filesystem backend root.
pub const DEFAULT_STORAGE_ROOT: &str = ".server_root/objects";
/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
