//! Typed snapshot models and the canonical request/response pair.
//!
//! # Design
//! - Pure data carriers shared by the version manager, stores, and transports.
//! - Transports decode into [`ConfigRequest`] at their boundary and encode
//!   [`ConfigResponse`] back; nothing here knows about a wire format.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{VersionError, VersionResult};

/// Opaque key/value configuration document owned by the client.
pub type Document = Map<String, Value>;

/// Positive, per-service snapshot version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Version(i32);

impl Version {
    /// Version assigned to the first snapshot of a service.
    pub const FIRST: Self = Self(1);

    /// Raw integer value as persisted.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// The version following this one, or `None` once the range is exhausted.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(next) => Some(Self(next)),
            None => None,
        }
    }
}

impl TryFrom<i32> for Version {
    type Error = VersionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(VersionError::BadRequest {
                field: "version",
                reason: "must be a positive integer",
            })
        }
    }
}

impl From<Version> for i32 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl Display for Version {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, formatter)
    }
}

/// Which snapshot of a service a request refers to.
///
/// On the wire this is a plain integer where `0` means "whatever is active".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelector {
    /// The currently active snapshot.
    #[default]
    Active,
    /// An explicit stored version.
    Exact(Version),
}

impl VersionSelector {
    /// Decode the wire integer (`0` = active).
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for negative values or values outside the `i32` range.
    pub fn from_wire(raw: i64) -> VersionResult<Self> {
        if raw == 0 {
            return Ok(Self::Active);
        }
        let value = i32::try_from(raw).map_err(|_| VersionError::BadRequest {
            field: "version",
            reason: "out of range",
        })?;
        Version::try_from(value).map(Self::Exact)
    }

    /// Encode back to the wire integer.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Active => 0,
            Self::Exact(version) => version.get(),
        }
    }
}

impl Display for VersionSelector {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => formatter.write_str("active"),
            Self::Exact(version) => write!(formatter, "{version}"),
        }
    }
}

/// Persisted configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Surrogate identity used for point updates and deletes.
    pub id: Uuid,
    /// Service the snapshot belongs to.
    pub service: String,
    /// Version within the service.
    pub version: Version,
    /// Client document, stored verbatim.
    pub data: Document,
    /// Whether this is the service's active snapshot.
    pub active: bool,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new snapshot row.
#[derive(Debug, Clone, Copy)]
pub struct NewSnapshot<'a> {
    /// Owning service.
    pub service: &'a str,
    /// Version assigned by the manager.
    pub version: Version,
    /// Client document.
    pub data: &'a Document,
    /// Initial activation flag.
    pub active: bool,
}

/// Canonical request shared by every transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    service: String,
    data: Option<Document>,
    version: VersionSelector,
    used: bool,
    extended: bool,
}

impl ConfigRequest {
    /// Start building a request for `service`.
    #[must_use]
    pub fn builder(service: impl Into<String>) -> ConfigRequestBuilder {
        ConfigRequestBuilder {
            request: Self {
                service: service.into(),
                data: None,
                version: VersionSelector::Active,
                used: false,
                extended: false,
            },
        }
    }

    /// Target service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Document supplied by the caller, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&Document> {
        self.data.as_ref()
    }

    /// Version the request refers to.
    #[must_use]
    pub const fn version(&self) -> VersionSelector {
        self.version
    }

    /// Desired activation state (update only).
    #[must_use]
    pub const fn used(&self) -> bool {
        self.used
    }

    /// Whether the caller asked for the full snapshot instead of just the data.
    #[must_use]
    pub const fn extended(&self) -> bool {
        self.extended
    }
}

/// Builder for [`ConfigRequest`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ConfigRequestBuilder {
    request: ConfigRequest,
}

impl ConfigRequestBuilder {
    /// Attach a document.
    pub fn data(mut self, data: Document) -> Self {
        self.request.data = Some(data);
        self
    }

    /// Attach an optional document.
    pub fn maybe_data(mut self, data: Option<Document>) -> Self {
        self.request.data = data;
        self
    }

    /// Select a version.
    pub const fn version(mut self, version: VersionSelector) -> Self {
        self.request.version = version;
        self
    }

    /// Set the desired activation state.
    pub const fn used(mut self, used: bool) -> Self {
        self.request.used = used;
        self
    }

    /// Request the full snapshot in responses.
    pub const fn extended(mut self, extended: bool) -> Self {
        self.request.extended = extended;
        self
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> ConfigRequest {
        self.request
    }
}

/// Result returned to transports for every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// Service name.
    pub service: String,
    /// Version the operation resolved to.
    pub version: Version,
    /// Document, present for create and get.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    /// Activation state after the operation.
    pub active: bool,
}

impl From<Snapshot> for ConfigResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            service: snapshot.service,
            version: snapshot.version,
            data: Some(snapshot.data),
            active: snapshot.active,
        }
    }
}
