//! Shared handler state.

use confvault_core::{SharedVersions, VersionResult};
use confvault_telemetry::Metrics;

use crate::http::constants::TRANSPORT_LABEL;

pub(crate) struct ApiState {
    pub(crate) versions: SharedVersions,
    pub(crate) metrics: Metrics,
}

impl ApiState {
    pub(crate) const fn new(versions: SharedVersions, metrics: Metrics) -> Self {
        Self { versions, metrics }
    }

    pub(crate) fn observe<T>(&self, operation: &str, result: &VersionResult<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        self.metrics.inc_operation(TRANSPORT_LABEL, operation, outcome);
    }
}
