use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use confvault_api::ApiServer;
use confvault_core::{MemoryStore, SharedVersions, VersionManager};
use confvault_data::PgSnapshotStore;
use confvault_rpc::RpcServer;
use confvault_telemetry::{GlobalContextGuard, LoggingConfig, Metrics};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{AppConfig, StoreKind};
use crate::error::{AppError, AppResult};

/// Entry point for the server boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, the store, or either listener fails.
pub async fn run_app() -> AppResult<()> {
    let config = AppConfig::from_env()?;
    confvault_telemetry::init_logging(&LoggingConfig {
        level: &config.log_level,
        format: config.log_format,
        build_sha: confvault_telemetry::build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(config.store.as_str());

    info!("confvault bootstrap starting");
    let app = App::start(&config).await?;
    app.run(shutdown_signal()).await
}

/// Store, metrics, and bound listeners ready to serve.
pub struct App {
    versions: SharedVersions,
    metrics: Metrics,
    pg: Option<PgSnapshotStore>,
    http: TcpListener,
    rpc: TcpListener,
}

impl App {
    /// Open the configured store and bind both listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable, migrations fail, or a
    /// listener cannot be bound.
    pub async fn start(config: &AppConfig) -> AppResult<Self> {
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

        let (versions, pg) = match config.store {
            StoreKind::Memory => {
                warn!("using in-memory store; snapshots are lost on exit");
                let versions: SharedVersions = Arc::new(VersionManager::new(MemoryStore::new()));
                (versions, None)
            }
            StoreKind::Postgres => {
                let url = config.database_url.as_deref().ok_or(AppError::MissingEnv {
                    name: "POSTGRES_URI",
                })?;
                let store = PgSnapshotStore::connect(url, config.pool)
                    .await
                    .map_err(|err| AppError::data("store.connect", err))?;
                info!("postgres store ready");
                let versions: SharedVersions = Arc::new(VersionManager::new(store.clone()));
                (versions, Some(store))
            }
        };

        let http = ApiServer::bind(config.http_addr())
            .await
            .map_err(|err| AppError::api_server("api_server.bind", err))?;
        let rpc = RpcServer::bind(config.rpc_addr())
            .await
            .map_err(|err| AppError::rpc("rpc_server.bind", err))?;

        Ok(Self {
            versions,
            metrics,
            pg,
            http,
            rpc,
        })
    }

    /// Bound address of the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn http_addr(&self) -> AppResult<SocketAddr> {
        self.http
            .local_addr()
            .map_err(|err| AppError::io("http_listener.local_addr", err))
    }

    /// Bound address of the RPC listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn rpc_addr(&self) -> AppResult<SocketAddr> {
        self.rpc
            .local_addr()
            .map_err(|err| AppError::io("rpc_listener.local_addr", err))
    }

    /// Serve both transports until `shutdown` resolves, then close the store.
    ///
    /// Either server failing stops the other.
    ///
    /// # Errors
    ///
    /// Returns the first server failure.
    pub async fn run<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            versions,
            metrics,
            pg,
            http,
            rpc,
        } = self;
        let (stop_tx, stop_rx) = watch::channel(false);

        let api = ApiServer::new(Arc::clone(&versions), metrics.clone());
        let rpc_server = RpcServer::new(versions, metrics);

        let http_task = api.serve(http, stopped(stop_rx.clone()));
        let rpc_task = rpc_server.serve(rpc, stopped(stop_rx));
        let signal = async {
            shutdown.await;
            info!("shutdown requested");
            let _ = stop_tx.send(true);
            Ok::<(), AppError>(())
        };

        let served = tokio::try_join!(
            async {
                http_task
                    .await
                    .map_err(|err| AppError::api_server("api_server.serve", err))
            },
            async {
                rpc_task
                    .await
                    .map_err(|err| AppError::rpc("rpc_server.serve", err))
            },
            signal,
        );

        if let Some(store) = pg {
            store.close().await;
        }
        served?;
        info!("confvault shutdown complete");
        Ok(())
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use confvault_data::PoolSettings;
    use confvault_rpc::RpcClient;
    use confvault_telemetry::LogFormat;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn memory_config() -> AppConfig {
        AppConfig {
            store: StoreKind::Memory,
            database_url: None,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            rpc_port: 0,
            pool: PoolSettings::default(),
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> anyhow::Result<String> {
        let mut stream = TcpStream::connect(addr).await?;
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    #[tokio::test]
    async fn both_transports_share_one_store() -> anyhow::Result<()> {
        let app = App::start(&memory_config()).await?;
        let http_addr = app.http_addr()?;
        let rpc_addr = app.rpc_addr()?;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(app.run(async {
            let _ = rx.await;
        }));

        let mut client = RpcClient::connect(&rpc_addr.to_string()).await?;
        let mut document = confvault_core::Document::new();
        document.insert("source".into(), json!("rpc"));
        let created = client.set_config("shared", &document).await?;
        assert_eq!(created.version, 1);
        drop(client);

        let response = http_get(http_addr, "/config?service=shared").await?;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"{"source":"rpc"}"#));

        let _ = tx.send(());
        running.await??;
        Ok(())
    }

    #[tokio::test]
    async fn postgres_without_url_is_missing_env() {
        let config = AppConfig {
            store: StoreKind::Postgres,
            ..memory_config()
        };
        let result = App::start(&config).await;
        assert!(matches!(result, Err(AppError::MissingEnv { .. })));
    }

    #[tokio::test]
    async fn stopped_resolves_after_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(stopped(rx));
        let _ = tx.send(true);
        assert!(waiter.await.is_ok());
    }
}
