//! # Design
//!
//! - Constant error messages; identifiers and reasons live in fields so callers can match on them.
//! - Entity-level failures (`EntityCopyFailure`) are values the orchestrator stores on a mapping.
//! - Object-store failures separate "not found" from transport problems.

use std::error::Error;
use std::fmt::Write as _;

use thiserror::Error;
use uuid::Uuid;

use crate::model::{BlobRole, CopyStatus, EntityType};

/// Result alias for replication operations.
pub type CopyResult<T> = Result<T, CopyError>;

/// Errors raised while planning, running, or inspecting a pipeline copy.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The source pipeline is missing a required entity; the plan cannot be built.
    #[error("pipeline structure incomplete")]
    Structural {
        /// Entity type that could not be resolved.
        entity_type: EntityType,
        /// Identifier that was referenced but not found, or the referencing id.
        source_id: i64,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// An active operation already exists for the same source training and owner.
    #[error("copy already running")]
    Conflict {
        /// Source training of the rejected request.
        source_training_id: i64,
        /// Owner key of the rejected request.
        owner: String,
        /// Identifier of the active operation when known.
        operation_id: Option<Uuid>,
    },
    /// Copying a single entity failed.
    #[error("entity copy failed")]
    EntityCopy(#[from] EntityCopyFailure),
    /// The copier was invoked before a parent mapping completed.
    #[error("copy precondition violated")]
    PreconditionViolation {
        /// Entity type being copied.
        entity_type: EntityType,
        /// Source identifier being copied.
        source_id: i64,
        /// Parent type without a completed mapping.
        missing_parent: EntityType,
    },
    /// A status change outside the permitted state machine was requested.
    #[error("invalid status transition")]
    InvalidTransition {
        /// Status the record currently holds.
        from: CopyStatus,
        /// Status that was requested.
        to: CopyStatus,
    },
    /// A compare-and-set update matched no row because another writer got there first.
    #[error("concurrent modification detected")]
    ConcurrentModification {
        /// Resource kind (`operation`, `mapping`).
        resource: &'static str,
        /// Identifier of the contested record.
        id: String,
        /// Status the caller expected to replace.
        expected: CopyStatus,
    },
    /// A referenced record does not exist.
    #[error("resource not found")]
    NotFound {
        /// Resource kind that was looked up.
        resource: &'static str,
        /// Identifier that was requested.
        id: String,
    },
    /// Retry was requested for an operation that already finished successfully.
    #[error("copy operation already completed")]
    AlreadyCompleted {
        /// Completed operation.
        operation_id: Uuid,
    },
    /// The persistence layer failed outside of an entity copy.
    #[error("copy store failure")]
    Store {
        /// Store operation that failed.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl CopyError {
    /// Wrap a persistence failure with the operation that produced it.
    pub fn store(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Store {
            operation,
            source: source.into(),
        }
    }

    /// Build a `NotFound` error from any displayable identifier.
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether the error signals a bug in planning or orchestration rather than a domain failure.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::PreconditionViolation { .. } | Self::InvalidTransition { .. }
        )
    }
}

/// Failure to copy one entity, recorded on its mapping.
#[derive(Debug, Error)]
#[error("entity copy failed")]
pub struct EntityCopyFailure {
    /// Entity type being copied.
    pub entity_type: EntityType,
    /// Source identifier being copied.
    pub source_id: i64,
    /// What went wrong.
    #[source]
    pub cause: CopyCause,
}

impl EntityCopyFailure {
    /// Construct a failure for the given entity.
    #[must_use]
    pub const fn new(entity_type: EntityType, source_id: i64, cause: CopyCause) -> Self {
        Self {
            entity_type,
            source_id,
            cause,
        }
    }

    /// Human-readable description persisted as the mapping's error message.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut message = format!("{} {}: {}", self.entity_type, self.source_id, self.cause);
        match &self.cause {
            CopyCause::Blob { role, source } => {
                let (ObjectStoreError::NotFound { bucket, key }
                | ObjectStoreError::Transport { bucket, key, .. }) = source;
                let _ = write!(message, " ({role}): {source} [{bucket}/{key}]");
                append_sources(&mut message, source);
            }
            CopyCause::Relational { source } => {
                let _ = write!(message, ": {source}");
                append_sources(&mut message, source.as_ref());
            }
            CopyCause::SourceMissing => {}
        }
        message
    }
}

/// Underlying reason an entity copy failed.
#[derive(Debug, Error)]
pub enum CopyCause {
    /// The source row disappeared between planning and copying.
    #[error("source row missing")]
    SourceMissing,
    /// Writing the target row failed.
    #[error("relational write failed")]
    Relational {
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Copying one of the entity's blobs failed.
    #[error("blob copy failed")]
    Blob {
        /// Blob being copied.
        role: BlobRole,
        /// Underlying object-store failure.
        #[source]
        source: ObjectStoreError,
    },
}

/// Errors surfaced by object-store adapters.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The source object does not exist.
    #[error("object not found")]
    NotFound {
        /// Bucket that was read.
        bucket: String,
        /// Missing key.
        key: String,
    },
    /// The store could not be reached or rejected the request.
    #[error("object store transport failure")]
    Transport {
        /// Store call that failed.
        operation: &'static str,
        /// Bucket involved.
        bucket: String,
        /// Key involved.
        key: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl ObjectStoreError {
    /// Construct a transport failure.
    pub fn transport(
        operation: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            source: source.into(),
        }
    }

    /// Whether the failure means the object is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn append_sources(message: &mut String, error: &(dyn Error + 'static)) {
    let mut current = error.source();
    while let Some(inner) = current {
        let _ = write!(message, ": {inner}");
        current = inner.source();
    }
}
