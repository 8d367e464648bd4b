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

//! Replication engine: plans a pipeline copy, runs it entity by entity, and
//! schedules runs on a bounded worker pool.
//!
//! Layout:
//! - `planner.rs`: expands a training into its ordered copy plan
//! - `copier.rs`: copies one entity row and its blobs
//! - `orchestrator.rs`: operation lifecycle (start, run, retry, status, listings)
//! - `history.rs`: best-effort audit trail writer
//! - `worker.rs`: queue-fed pool of orchestrator runs

pub mod copier;
pub mod history;
pub mod orchestrator;
pub mod planner;
pub mod worker;

pub use copier::{CopiedEntity, EntityCopier, ParentTargets, target_blob_key};
pub use history::HistoryRecorder;
pub use orchestrator::{
    CopyOperationHandle, CopyOrchestrator, CopyStatusReport, OrchestratorOptions,
    StartCopyRequest,
};
pub use planner::plan_copy;
pub use worker::{CopyWorkerPool, PoolClosed};
