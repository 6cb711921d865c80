//! Metrics facade for adgate.
//!
//! Crates record through the re-exported `metrics` macros. Without an
//! installed recorder every call is a no-op, so instrumentation is cheap to
//! leave in place. The `prometheus` feature installs a recorder whose handle
//! renders the text exposition format served at `/metrics`.

pub use metrics::{counter, histogram};

/// Metric names shared between the filter engine and the gateway.
pub mod names {
    /// Classifications, labelled by `result` (`blocked` / `allowed`) and `reason`.
    pub const CLASSIFICATIONS_TOTAL: &str = "adgate_classifications_total";
    /// Classification failures that were resolved by failing open.
    pub const CLASSIFICATION_ERRORS_TOTAL: &str = "adgate_classification_errors_total";
    /// Remote list refresh attempts, labelled by `result`.
    pub const REMOTE_REFRESH_TOTAL: &str = "adgate_remote_refresh_total";
    /// Domains merged from the remote list.
    pub const REMOTE_DOMAINS_ADDED_TOTAL: &str = "adgate_remote_domains_added_total";
    /// Requests forwarded upstream, labelled by `result`.
    pub const PROXY_FORWARDS_TOTAL: &str = "adgate_proxy_forwards_total";
    /// Wall-clock duration of an upstream forward.
    pub const PROXY_FORWARD_DURATION_SECONDS: &str = "adgate_proxy_forward_duration_seconds";
}

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Install the global Prometheus recorder and return its render handle.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus recorder installed");
    Ok(handle)
}
