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
#![allow(clippy::redundant_pub_crate)]

//! Command-line client for a confvault server's HTTP API.
//!
//! Layout:
//! - `cli.rs`: argument parsing and command dispatch
//! - `commands.rs`: one handler per subcommand
//! - `client.rs`: HTTP client construction and error classification
//! - `output.rs`: JSON rendering

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod commands;
pub(crate) mod output;

pub use cli::run;
