//! HTTP surface modules.

/// `/config` handlers and request decoding.
pub mod config;
/// Shared constants.
pub mod constants;
/// JSON error envelope.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Router construction and server host.
pub mod router;
/// Request counting middleware.
pub mod telemetry;
