//! Router construction and server host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::Request, routing::get};
use confvault_core::SharedVersions;
use confvault_telemetry::{Metrics, build_sha, propagate_request_id_layer, set_request_id_layer};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::config::{create_config, delete_config, get_config, update_config};
use crate::http::constants::{HEADER_REQUEST_ID, MAX_BODY_BYTES};
use crate::http::health::{self, health};
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Axum router wrapper that hosts the `/config` resource.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router around the shared version manager and metrics registry.
    #[must_use]
    pub fn new(versions: SharedVersions, metrics: Metrics) -> Self {
        let state = Arc::new(ApiState::new(versions, metrics.clone()));

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );

        let router = Router::new()
            .route(
                "/config",
                get(get_config)
                    .post(create_config)
                    .put(update_config)
                    .delete(delete_config),
            )
            .route("/health", get(health))
            .route("/metrics", get(health::metrics))
            .route_layer(HttpMetricsLayer::new(metrics))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(propagate_request_id_layer())
                    .layer(trace_layer),
            )
            .with_state(state);

        Self { router }
    }

    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> ApiServerResult<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })
    }

    /// Serve on `listener` until `shutdown` resolves; in-flight requests finish first.
    ///
    /// # Errors
    ///
    /// Returns an error if the server terminates with an IO failure.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "http server listening");
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })?;
        info!("http server stopped");
        Ok(())
    }

    /// The assembled router.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
