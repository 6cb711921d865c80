//! Filter crate: URL classification, flat-list storage, remote list
//! refresh and traffic statistics.
//!
//! Feature flags:
//! - `metrics` — classification and refresh counters via `adgate-metrics`

pub mod engine;
pub mod error;
pub mod lists;
pub mod remote;
pub mod stats;
pub mod store;
pub mod types;

pub use {
    engine::{BlocklistEngine, EngineOptions},
    error::{Error, Result},
    lists::{CompiledPattern, FilterLists, target_host},
    remote::RemoteListUpdater,
    stats::{StatsAggregator, StatsSnapshot},
    store::ListStore,
    types::*,
};
