//! HTTP surface of adgate: the filtering pipeline, the upstream forwarder
//! and the `/api` admin and stats routes.
//!
//! Feature flags:
//! - `metrics`    — forwarding counters and latency histogram
//! - `prometheus` — installs the Prometheus recorder and serves `/metrics`

pub mod blocklist_routes;
pub mod error;
pub mod forward;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod stats_routes;

pub use {
    error::ApiError,
    server::{build_gateway_app, spawn_refresh_task, start_gateway},
    state::GatewayState,
};
