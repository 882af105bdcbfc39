//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collector registration stays private; callers only record outcomes.
//! - One registry per process, cloned cheaply into each server.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};

/// Metrics shared by the HTTP and RPC servers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    operations_total: IntCounterVec,
}

fn counter_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let register_err = |source| TelemetryError::MetricsRegister { name, source };
    let counter = IntCounterVec::new(Opts::new(name, help), labels).map_err(register_err)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(register_err)?;
    Ok(counter)
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let http_requests_total = counter_vec(
            &registry,
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let operations_total = counter_vec(
            &registry,
            "confvault_operations_total",
            "Version manager operations by transport and outcome",
            &["transport", "operation", "outcome"],
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                operations_total,
            }),
        })
    }

    /// Count one HTTP request for `route` answered with `status`.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count one version manager operation.
    ///
    /// `outcome` is `ok` or an error kind label.
    pub fn inc_operation(&self, transport: &str, operation: &str, outcome: &str) {
        self.inner
            .operations_total
            .with_label_values(&[transport, operation, outcome])
            .inc();
    }

    /// Current value of one operation counter.
    #[must_use]
    pub fn operation_count(&self, transport: &str, operation: &str, outcome: &str) -> u64 {
        self.inner
            .operations_total
            .with_label_values(&[transport, operation, outcome])
            .get()
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }
}
