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

//! Request/response RPC adapter for confvault.
//!
//! Each frame on the TCP stream is a 4-byte big-endian length followed by a
//! MessagePack body. A connection carries any number of request/response
//! pairs, strictly in order.

pub mod client;
pub mod error;
pub mod frame;
pub mod server;

pub use client::RpcClient;
pub use error::{RpcClientError, RpcError};
pub use frame::{MAX_FRAME_BYTES, RpcConfig, RpcMethod, RpcRequest, RpcResponse, RpcStatus};
pub use server::RpcServer;
