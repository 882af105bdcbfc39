//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use confvault_core::StoreError;

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
    /// The connection pool could not be established.
    ConnectFailed {
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
}

impl DataError {
    /// Whether the failure is a unique-constraint violation (SQLSTATE 23505).
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::QueryFailed { source, .. } => source
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation()),
            Self::MigrationFailed { .. } | Self::ConnectFailed { .. } => false,
        }
    }

    const fn operation(&self) -> &'static str {
        match self {
            Self::MigrationFailed { .. } => "migrate",
            Self::ConnectFailed { .. } => "connect",
            Self::QueryFailed { operation, .. } => *operation,
        }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MigrationFailed { .. } => formatter.write_str("migration failed"),
            Self::ConnectFailed { .. } => formatter.write_str("database connection failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MigrationFailed { source } => Some(source),
            Self::ConnectFailed { source } | Self::QueryFailed { source, .. } => Some(source),
        }
    }
}

impl From<DataError> for StoreError {
    fn from(err: DataError) -> Self {
        Self::backend(err.operation(), err)
    }
}
