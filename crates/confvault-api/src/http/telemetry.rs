//! HTTP metrics middleware for request counting.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use axum::extract::MatchedPath;
use axum::http::Request;
use confvault_telemetry::Metrics;
use tower::{Layer, Service};
use tracing::debug;

const UNMATCHED_ROUTE: &str = "unmatched";

/// Wraps routed services to count requests per matched route and status code.
#[derive(Clone)]
pub(crate) struct HttpMetricsLayer {
    metrics: Metrics,
}

impl HttpMetricsLayer {
    pub(crate) const fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct HttpMetricsService<S> {
    inner: S,
    metrics: Metrics,
}

impl<S, B> Service<Request<B>> for HttpMetricsService<S>
where
    S: Service<Request<B>, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Raw paths would make the label set unbounded.
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
            .to_string();
        let metrics = self.metrics.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await?;
            let status = response.status();
            if status.is_server_error() {
                debug!(%route, status = status.as_u16(), "request failed");
            }
            metrics.inc_http_request(&route, status.as_u16());
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[tokio::test]
    async fn requests_without_a_matched_route_share_one_label() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let inner = tower::service_fn(|_req: Request<Body>| async {
            Ok::<Response, Infallible>(StatusCode::NO_CONTENT.into_response())
        });
        let service = HttpMetricsLayer::new(metrics.clone()).layer(inner);

        for path in ["/a", "/b/c"] {
            let request = Request::builder().uri(path).body(Body::empty())?;
            let response = service.clone().oneshot(request).await?;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let text = metrics.render()?;
        assert!(text.contains("http_requests_total{code=\"204\",route=\"unmatched\"} 2"));
        Ok(())
    }
}
