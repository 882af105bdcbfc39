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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! PostgreSQL persistence for confvault: migrations and the snapshot store.

pub mod error;
pub mod store;

pub use error::{DataError, Result as DataResult};
pub use store::{PgSnapshotStore, PgTransaction, PoolSettings, run_migrations};
