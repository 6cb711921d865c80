use std::sync::Arc;

use {
    adgate_config::{AdgateConfig, Environment},
    adgate_filter::{BlocklistEngine, StatsAggregator},
};

#[cfg(feature = "prometheus")]
use adgate_metrics::PrometheusHandle;

/// Shared state behind every route and the filtering middleware.
pub struct GatewayState {
    pub engine: Arc<BlocklistEngine>,
    pub stats: Arc<StatsAggregator>,
    /// Client used for upstream forwarding. Never follows redirects.
    pub http: reqwest::Client,
    pub max_body_bytes: usize,
    pub environment: Environment,
    pub version: String,
    #[cfg(feature = "prometheus")]
    pub prometheus: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        engine: Arc<BlocklistEngine>,
        stats: Arc<StatsAggregator>,
        config: &AdgateConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            engine,
            stats,
            http,
            max_body_bytes: config.proxy.max_body_bytes,
            environment: config.server.environment,
            version: env!("CARGO_PKG_VERSION").to_string(),
            #[cfg(feature = "prometheus")]
            prometheus: None,
        })
    }

    /// Whether internal error details may be shown to clients.
    pub fn exposes_errors(&self) -> bool {
        !self.environment.is_production()
    }
}
