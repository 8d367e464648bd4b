#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Runtime configuration for the replication engine.
//!
//! Layout:
//! - `model.rs`: typed configuration sections
//! - `defaults.rs`: default values and environment variable names
//! - `loader.rs`: environment parsing and validation
//! - `error.rs`: configuration errors

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    DatabaseSettings, EngineSettings, LogSettings, LogStyle, ReplicaConfig, StorageBackend,
    StorageSettings,
};
