//! Error types for the RPC server and client.

use std::io;
use std::net::SocketAddr;

use confvault_core::ErrorKind;
use thiserror::Error;

/// Failures on the server side of the RPC adapter, and in frame handling.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Binding the listener failed.
    #[error("failed to bind rpc listener")]
    Bind {
        /// Address attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing the stream failed.
    #[error("rpc stream io failed")]
    Io(#[from] io::Error),
    /// The stream ended part-way through a length prefix.
    #[error("rpc stream ended inside a frame length prefix")]
    TruncatedFrame {
        /// Prefix bytes received before the stream closed.
        received: usize,
    },
    /// A frame exceeded the size limit.
    #[error("rpc frame exceeds size limit")]
    FrameTooLarge {
        /// Declared or encoded length in bytes.
        len: usize,
    },
    /// Encoding a frame body failed.
    #[error("failed to encode rpc frame")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Decoding a frame body failed.
    #[error("failed to decode rpc frame")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Failures observed by [`RpcClient`](crate::RpcClient).
#[derive(Debug, Error)]
pub enum RpcClientError {
    /// The server could not be reached.
    #[error("failed to connect to rpc server at {addr}")]
    Connect {
        /// Address attempted.
        addr: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Sending or receiving a frame failed.
    #[error("rpc transport failed")]
    Transport(#[from] RpcError),
    /// The server closed the connection before answering.
    #[error("rpc server closed the connection")]
    Closed,
    /// The document could not be encoded as JSON.
    #[error("failed to encode document")]
    Document(#[from] serde_json::Error),
    /// The server answered with an error status.
    #[error("{message}")]
    Status {
        /// Error classification.
        code: ErrorKind,
        /// Server-provided message.
        message: String,
    },
}

impl RpcClientError {
    /// Server-side classification, when the server answered with a status.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorKind> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_are_constant_and_sources_kept() {
        let bind = RpcError::Bind {
            addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(bind.to_string(), "failed to bind rpc listener");
        assert!(bind.source().is_some());

        let status = RpcClientError::Status {
            code: ErrorKind::Forbidden,
            message: "snapshot in use".into(),
        };
        assert_eq!(status.to_string(), "snapshot in use");
        assert_eq!(status.code(), Some(ErrorKind::Forbidden));
        assert_eq!(RpcClientError::Closed.code(), None);
    }
}
