//! Shared HTTP constants.

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const TRANSPORT_LABEL: &str = "http";
pub(crate) const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
