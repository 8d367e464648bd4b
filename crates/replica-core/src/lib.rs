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

//! Domain model and collaborator contracts for replicating training pipelines.
//!
//! Layout:
//! - `model/`: entity types, statuses, owners, operations, mappings, history, plans, pipeline rows
//! - `service/`: async traits implemented by persistence, object-store, and owner adapters
//! - `error.rs`: the copy error taxonomy shared by every crate in the workspace

pub mod error;
pub mod model;
pub mod service;

pub use error::{CopyCause, CopyError, CopyResult, EntityCopyFailure, ObjectStoreError};
pub use model::{
    AlgorithmConfig, BlobRole, BlobTransfer, Buckets, CopyOperation, CopyPlan, CopyStatus,
    CustomAlgorithmConfig, Dataset, DatasetConfig, EntityMapping, EntityRow, EntityType,
    HistoryAction, HistoryEntry, MappingSummary, Model, NewCopyOperation, NewHistoryEntry,
    OwnerRequest, ParentRef, PlannedEntity, TargetOwner, Training,
};
pub use service::{
    CopyStore, HistoryLog, MappingRegistry, ObjectStore, OperationRepository, OwnerResolver,
    PipelineCatalog,
};
