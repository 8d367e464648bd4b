//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug)]
pub enum DataError {
    /// Migration execution failed.
    MigrationFailed {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A stored value could not be mapped onto the domain model.
    Decode {
        /// Column holding the value.
        field: &'static str,
        /// Offending value when printable.
        value: Option<String>,
    },
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrationFailed { .. } => formatter.write_str("migration failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
            Self::Decode { .. } => formatter.write_str("stored value could not be decoded"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MigrationFailed { source } => Some(source),
            Self::QueryFailed { source, .. } => Some(source),
            Self::Decode { .. } => None,
        }
    }
}

impl DataError {
    pub(crate) fn decode(field: &'static str, value: impl Into<String>) -> Self {
        Self::Decode {
            field,
            value: Some(value.into()),
        }
    }

    /// Whether the failure is a unique-constraint violation on `constraint`.
    #[must_use]
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        match self {
            Self::QueryFailed {
                source: sqlx::Error::Database(db),
                ..
            } => db.is_unique_violation() && db.constraint() == Some(constraint),
            _ => false,
        }
    }
}
