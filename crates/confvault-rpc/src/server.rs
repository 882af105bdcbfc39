//! RPC server: accept loop, one task per connection.
//!
//! # Design
//! - Each connection answers its frames sequentially until EOF.
//! - Shutdown stops the accept loop, then tells every connection to stop after
//!   its current request; the server returns once all of them have finished.
//! - A body that fails to decode is answered with `BadRequest` and the
//!   connection stays usable; an oversized frame closes it.

use std::future::Future;
use std::net::SocketAddr;

use confvault_core::{ConfigResponse, ErrorKind, SharedVersions, VersionError};
use confvault_telemetry::Metrics;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::RpcError;
use crate::frame::{
    RpcConfig, RpcMethod, RpcRequest, RpcResponse, RpcStatus, read_frame, write_frame,
};

const TRANSPORT_LABEL: &str = "rpc";

/// Serves [`RpcRequest`] frames against the shared version manager.
#[derive(Clone)]
pub struct RpcServer {
    versions: SharedVersions,
    metrics: Metrics,
}

impl RpcServer {
    /// Create a server around the shared version manager.
    #[must_use]
    pub fn new(versions: SharedVersions, metrics: Metrics) -> Self {
        Self { versions, metrics }
    }

    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RpcError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| RpcError::Bind { addr, source })
    }

    /// Accept connections until `shutdown` resolves, then drain open connections.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are logged and retried.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "rpc server listening");
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        let stop = stop_rx.clone();
                        connections.spawn(
                            server
                                .handle_connection(stream, stop)
                                .instrument(info_span!("rpc.connection", %peer)),
                        );
                    }
                    Err(err) => warn!(error = %err, "failed to accept rpc connection"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "rpc connection task failed");
                    }
                }
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "rpc connection task failed");
            }
        }
        info!("rpc server stopped");
        Ok(())
    }

    async fn handle_connection(self, stream: TcpStream, mut stop: watch::Receiver<bool>) {
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);
        debug!("rpc connection opened");

        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.changed() => break,
                frame = read_frame::<_, RpcRequest>(&mut reader) => frame,
            };
            let response = match frame {
                Ok(None) => break,
                Ok(Some(request)) => self.dispatch(request).await,
                Err(RpcError::Decode(err)) => {
                    warn!(error = %err, "undecodable rpc frame");
                    RpcResponse::Err(RpcStatus {
                        code: ErrorKind::BadRequest,
                        message: "malformed request frame".into(),
                    })
                }
                Err(err) => {
                    warn!(error = %err, "closing rpc connection");
                    if matches!(err, RpcError::FrameTooLarge { .. }) {
                        let refusal = RpcResponse::Err(RpcStatus {
                            code: ErrorKind::BadRequest,
                            message: err.to_string(),
                        });
                        let _ = write_frame(&mut writer, &refusal).await;
                    }
                    break;
                }
            };
            if let Err(err) = write_frame(&mut writer, &response).await {
                warn!(error = %err, "failed to write rpc response");
                break;
            }
        }
        debug!("rpc connection closed");
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let method = request.method;
        let span = info_span!(
            "rpc.request",
            method = method.operation(),
            service = %request.service,
            version = request.version
        );
        let result = self.run(method, &request).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        self.metrics
            .inc_operation(TRANSPORT_LABEL, method.operation(), outcome);

        match result.map(|response| RpcConfig::from_response(&response)) {
            Ok(Ok(config)) => RpcResponse::Ok(config),
            Ok(Err(err)) => {
                error!(error = %err, "failed to encode rpc response document");
                RpcResponse::Err(RpcStatus {
                    code: ErrorKind::Internal,
                    message: "failed to encode response document".into(),
                })
            }
            Err(err) => {
                if err.kind() == ErrorKind::Internal {
                    error!(error = %err, detail = %err.client_message(), "rpc request failed");
                }
                RpcResponse::Err(RpcStatus {
                    code: err.kind(),
                    message: err.client_message(),
                })
            }
        }
    }

    async fn run(
        &self,
        method: RpcMethod,
        request: &RpcRequest,
    ) -> Result<ConfigResponse, VersionError> {
        let request = request.to_config_request()?;
        match method {
            RpcMethod::SetConfig => self.versions.create(&request).await,
            RpcMethod::GetConfig => self.versions.get(&request).await,
            RpcMethod::UpdConfig => self.versions.update(&request).await,
            RpcMethod::DelConfig => self.versions.delete(&request).await,
        }
    }
}
