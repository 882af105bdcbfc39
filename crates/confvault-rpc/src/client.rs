//! Client for the RPC adapter.

use std::collections::HashMap;
use std::env;

use confvault_core::Document;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::error::RpcClientError;
use crate::frame::{RpcConfig, RpcMethod, RpcRequest, RpcResponse, read_frame, write_frame};

const HOST_ENV: &str = "CONFVAULT_RPC_HOST";
const PORT_ENV: &str = "CONFVAULT_RPC_PORT";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "50051";

/// One connection to an RPC server; requests are answered in order.
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl RpcClient {
    /// Connect to `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`RpcClientError::Connect`] when the server is unreachable.
    pub async fn connect(addr: &str) -> Result<Self, RpcClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RpcClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        debug!(%addr, "connected to rpc server");
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        })
    }

    /// Connect using `CONFVAULT_RPC_HOST` and `CONFVAULT_RPC_PORT`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcClientError::Connect`] when the server is unreachable.
    pub async fn from_env() -> Result<Self, RpcClientError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let addr = address_from_lookup(|key| vars.get(key).cloned());
        Self::connect(&addr).await
    }

    /// Store `data` as the new active snapshot of `service`.
    ///
    /// # Errors
    ///
    /// Returns the server's status or a transport failure.
    pub async fn set_config(
        &mut self,
        service: &str,
        data: &Document,
    ) -> Result<RpcConfig, RpcClientError> {
        let data = serde_json::to_vec(data)?;
        self.call(RpcMethod::SetConfig, service, 0, false, data)
            .await
    }

    /// Fetch a snapshot; `version` `0` selects the active one.
    ///
    /// # Errors
    ///
    /// Returns the server's status or a transport failure.
    pub async fn get_config(
        &mut self,
        service: &str,
        version: i32,
    ) -> Result<RpcConfig, RpcClientError> {
        self.call(RpcMethod::GetConfig, service, version, false, Vec::new())
            .await
    }

    /// Activate (`used = true`) or deactivate a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the server's status or a transport failure.
    pub async fn update_config(
        &mut self,
        service: &str,
        version: i32,
        used: bool,
    ) -> Result<RpcConfig, RpcClientError> {
        self.call(RpcMethod::UpdConfig, service, version, used, Vec::new())
            .await
    }

    /// Delete an inactive snapshot.
    ///
    /// # Errors
    ///
    /// Returns the server's status or a transport failure.
    pub async fn delete_config(
        &mut self,
        service: &str,
        version: i32,
    ) -> Result<RpcConfig, RpcClientError> {
        self.call(RpcMethod::DelConfig, service, version, false, Vec::new())
            .await
    }

    async fn call(
        &mut self,
        method: RpcMethod,
        service: &str,
        version: i32,
        used: bool,
        data: Vec<u8>,
    ) -> Result<RpcConfig, RpcClientError> {
        let request = RpcRequest {
            method,
            service: service.to_string(),
            version,
            used,
            data,
        };
        write_frame(&mut self.writer, &request).await?;
        match read_frame::<_, RpcResponse>(&mut self.reader).await? {
            Some(RpcResponse::Ok(config)) => Ok(config),
            Some(RpcResponse::Err(status)) => Err(RpcClientError::Status {
                code: status.code,
                message: status.message,
            }),
            None => Err(RpcClientError::Closed),
        }
    }
}

fn address_from_lookup<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup(HOST_ENV)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = lookup(PORT_ENV)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    format!("{host}:{port}")
}
