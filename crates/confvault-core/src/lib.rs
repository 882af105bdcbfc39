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

//! Versioned configuration snapshots for client services.
//!
//! Layout: `model.rs` (snapshots, requests, responses), `error.rs` (error kinds),
//! `store.rs` (transactional persistence contract), `manager.rs` (`VersionManager`
//! + `VersionFacade`), `memory.rs` (in-process store).

pub mod error;
pub mod manager;
pub mod memory;
pub mod model;
pub mod store;

pub use error::{ErrorKind, StoreError, StoreResult, VersionError, VersionResult};
pub use manager::{SharedVersions, VersionFacade, VersionManager};
pub use memory::MemoryStore;
pub use model::{
    ConfigRequest, ConfigRequestBuilder, ConfigResponse, Document, NewSnapshot, Snapshot, Version,
    VersionSelector,
};
pub use store::{SnapshotStore, StoreTransaction};
