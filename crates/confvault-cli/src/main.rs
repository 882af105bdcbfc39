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

//! `confvault` binary entrypoint.

use std::process;

/// Runs the requested command and exits with its status code.
#[tokio::main]
async fn main() {
    let code = confvault_cli::run().await;
    process::exit(code);
}
