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

//! Confvault server bootstrap wiring.
//!
//! Layout: `config.rs` (environment parsing), `bootstrap.rs` (store selection,
//! listeners, shutdown), `error.rs` (application errors).

/// Process startup, serving, and shutdown.
pub mod bootstrap;
/// Environment-driven settings.
pub mod config;
/// Application-level error type.
pub mod error;

pub use bootstrap::{App, run_app, shutdown_signal};
pub use config::{AppConfig, StoreKind};
pub use error::{AppError, AppResult};
