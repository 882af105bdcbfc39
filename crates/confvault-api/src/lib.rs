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

//! HTTP adapter for confvault.
//!
//! Decodes `/config` requests into [`confvault_core::ConfigRequest`], runs them
//! through the shared version manager, and encodes the JSON envelopes clients
//! expect. Health and Prometheus endpoints ride on the same router.

pub mod error;
pub mod http;
pub(crate) mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
