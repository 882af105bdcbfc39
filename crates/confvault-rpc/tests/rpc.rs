//! End-to-end exercises of the RPC adapter over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use confvault_core::{Document, ErrorKind, MemoryStore, SharedVersions, VersionManager};
use confvault_rpc::{RpcClient, RpcClientError, RpcServer};
use confvault_telemetry::Metrics;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    metrics: Metrics,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), confvault_rpc::RpcError>>,
}

impl Running {
    async fn start() -> anyhow::Result<Self> {
        let metrics = Metrics::new()?;
        let versions: SharedVersions = Arc::new(VersionManager::new(MemoryStore::new()));
        let listener = RpcServer::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();
        let server = RpcServer::new(versions, metrics.clone());
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = stopped.await;
        }));
        Ok(Self {
            addr,
            metrics,
            stop,
            handle,
        })
    }

    async fn client(&self) -> anyhow::Result<RpcClient> {
        Ok(RpcClient::connect(&self.addr.to_string()).await?)
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.handle.await??;
        Ok(())
    }
}

fn document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[tokio::test]
async fn rollback_scenario_over_rpc() -> anyhow::Result<()> {
    let running = Running::start().await?;
    let mut client = running.client().await?;

    let first = client.set_config("s", &document(json!({"k": "v"}))).await?;
    assert_eq!((first.version, first.used), (1, true));
    let second = client.set_config("s", &document(json!({"k": "v2"}))).await?;
    assert_eq!((second.version, second.used), (2, true));

    let active = client.get_config("s", 0).await?;
    assert_eq!(active.version, 2);
    assert_eq!(active.document()?, Some(document(json!({"k": "v2"}))));

    let activated = client.update_config("s", 1, true).await?;
    assert_eq!((activated.version, activated.used), (1, true));
    assert!(activated.data.is_empty());

    let active = client.get_config("s", 0).await?;
    assert_eq!(active.version, 1);
    assert_eq!(active.document()?, Some(document(json!({"k": "v"}))));

    let deleted = client.delete_config("s", 2).await?;
    assert_eq!((deleted.version, deleted.used), (2, false));

    let missing = client.get_config("s", 2).await;
    assert_eq!(missing.err().and_then(|err| err.code()), Some(ErrorKind::NotFound));

    drop(client);
    assert_eq!(running.metrics.operation_count("rpc", "create", "ok"), 2);
    assert_eq!(running.metrics.operation_count("rpc", "get", "not_found"), 1);
    running.shutdown().await
}

#[tokio::test]
async fn failures_carry_status_codes() -> anyhow::Result<()> {
    let running = Running::start().await?;
    let mut client = running.client().await?;

    let blank = client.get_config("", 0).await;
    assert_eq!(blank.err().and_then(|err| err.code()), Some(ErrorKind::BadRequest));

    client.set_config("svc", &document(json!({"a": 1}))).await?;
    let in_use = client.delete_config("svc", 1).await;
    match in_use {
        Err(RpcClientError::Status { code, message }) => {
            assert_eq!(code, ErrorKind::Forbidden);
            assert!(!message.is_empty());
        }
        other => anyhow::bail!("expected forbidden status, got {other:?}"),
    }

    let sentinel = client.delete_config("svc", 0).await;
    assert_eq!(
        sentinel.err().and_then(|err| err.code()),
        Some(ErrorKind::BadRequest)
    );

    // The connection survives error replies.
    let still_there = client.get_config("svc", 1).await?;
    assert!(still_there.used);

    drop(client);
    running.shutdown().await
}

#[tokio::test]
async fn malformed_frame_is_answered_and_connection_kept() -> anyhow::Result<()> {
    let running = Running::start().await?;

    let mut raw = TcpStream::connect(running.addr).await?;
    let garbage = [0xc1_u8, 0xc1, 0xc1];
    raw.write_u32(u32::try_from(garbage.len())?).await?;
    raw.write_all(&garbage).await?;
    raw.flush().await?;

    let reply: Option<confvault_rpc::RpcResponse> =
        confvault_rpc::frame::read_frame(&mut raw).await?;
    match reply {
        Some(confvault_rpc::RpcResponse::Err(status)) => {
            assert_eq!(status.code, ErrorKind::BadRequest);
        }
        other => anyhow::bail!("expected bad request, got {other:?}"),
    }

    let request = confvault_rpc::RpcRequest {
        method: confvault_rpc::RpcMethod::GetConfig,
        service: "nobody".into(),
        version: 0,
        used: false,
        data: Vec::new(),
    };
    confvault_rpc::frame::write_frame(&mut raw, &request).await?;
    let reply: Option<confvault_rpc::RpcResponse> =
        confvault_rpc::frame::read_frame(&mut raw).await?;
    assert!(matches!(
        reply,
        Some(confvault_rpc::RpcResponse::Err(status)) if status.code == ErrorKind::NotFound
    ));

    drop(raw);
    running.shutdown().await
}

#[tokio::test]
async fn shutdown_closes_idle_connections() -> anyhow::Result<()> {
    let running = Running::start().await?;
    let mut client = running.client().await?;
    client.set_config("svc", &document(json!({"a": 1}))).await?;

    running.shutdown().await?;

    let after = client.get_config("svc", 0).await;
    assert!(after.is_err());
    Ok(())
}
