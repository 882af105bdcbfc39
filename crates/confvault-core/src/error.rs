//! Error types for version management and store access.
//!
//! # Design
//! - Messages stay constant; context travels in structured fields.
//! - Every failure maps onto one stable [`ErrorKind`] that transports translate
//!   into their own status signalling.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Version, VersionSelector};

/// Result alias for version manager operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Result alias for store primitives.
pub type StoreResult<T> = Result<T, StoreError>;

/// Stable, transport-independent failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Required field missing or malformed.
    BadRequest,
    /// No snapshot matches the request.
    NotFound,
    /// Operation not permitted on the snapshot's current state.
    Forbidden,
    /// Duplicate `(service, version)`.
    Conflict,
    /// Storage, connectivity, or encoding failure.
    Internal,
}

impl ErrorKind {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

/// Failure raised by a [`SnapshotStore`](crate::store::SnapshotStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(service, version)` pair or the active slot is already taken.
    #[error("snapshot already exists")]
    Conflict {
        /// Service whose constraint was violated.
        service: String,
        /// Version involved, when known.
        version: Option<Version>,
    },
    /// The backend failed.
    #[error("store operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying backend error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap an arbitrary backend error.
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

/// Primary error type for version manager operations.
#[derive(Debug, Error)]
pub enum VersionError {
    /// A required field was missing or malformed.
    #[error("invalid request")]
    BadRequest {
        /// Offending field.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// No snapshot matched.
    #[error("no data on request parameters")]
    NotFound {
        /// Requested service.
        service: String,
        /// Requested version.
        version: VersionSelector,
    },
    /// Attempted to delete the active snapshot.
    #[error("snapshot in use")]
    Forbidden {
        /// Requested service.
        service: String,
        /// Active version that was targeted.
        version: Version,
    },
    /// A version was already taken.
    #[error("snapshot version conflict")]
    Conflict {
        /// Requested service.
        service: String,
        /// Version involved, when known.
        version: Option<Version>,
    },
    /// The store failed.
    #[error("internal storage failure")]
    Internal {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl VersionError {
    /// Stable classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Human-readable message for transports, including the field for bad requests.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::BadRequest { field, reason } => format!("{field} parameter {reason}"),
            Self::Internal { source, .. } => match source.source() {
                Some(inner) => format!("{source}: {inner}"),
                None => source.to_string(),
            },
            other => other.to_string(),
        }
    }

    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| match source {
            StoreError::Conflict { service, version } => Self::Conflict { service, version },
            other => Self::Internal {
                operation,
                source: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn kinds_are_stable() {
        let bad = VersionError::BadRequest {
            field: "service",
            reason: "must be specified",
        };
        assert_eq!(bad.kind(), ErrorKind::BadRequest);
        assert_eq!(bad.client_message(), "service parameter must be specified");

        let forbidden = VersionError::Forbidden {
            service: "svc".into(),
            version: Version::FIRST,
        };
        assert_eq!(forbidden.kind(), ErrorKind::Forbidden);
        assert_eq!(forbidden.to_string(), "snapshot in use");

        let missing = VersionError::NotFound {
            service: "svc".into(),
            version: VersionSelector::Active,
        };
        assert_eq!(missing.kind().as_str(), "not_found");
    }

    #[test]
    fn store_conflicts_keep_their_kind() {
        let mapped = VersionError::store("create.insert")(StoreError::Conflict {
            service: "svc".into(),
            version: Some(Version::FIRST),
        });
        assert_eq!(mapped.kind(), ErrorKind::Conflict);

        let backend = VersionError::store("create.insert")(StoreError::backend(
            "insert",
            io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"),
        ));
        assert_eq!(backend.kind(), ErrorKind::Internal);
        assert!(StdError::source(&backend).is_some());
        assert_eq!(
            backend.client_message(),
            "store operation failed: connection reset"
        );
    }
}
