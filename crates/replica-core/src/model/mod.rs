//! Domain types for pipeline replication.

mod entity;
mod history;
mod mapping;
mod operation;
mod owner;
mod pipeline;
mod plan;
mod status;

pub use entity::{BlobRole, Buckets, EntityType};
pub use history::{HistoryAction, HistoryEntry, NewHistoryEntry};
pub use mapping::{BlobTransfer, EntityMapping, MappingSummary};
pub use operation::{CopyOperation, NewCopyOperation};
pub use owner::{OwnerRequest, TargetOwner};
pub use pipeline::{
    AlgorithmConfig, CustomAlgorithmConfig, Dataset, DatasetConfig, EntityRow, Model, Training,
};
pub use plan::{CopyPlan, ParentRef, PlannedEntity};
pub use status::CopyStatus;
