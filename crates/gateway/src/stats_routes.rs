//! `/api/stats/*` routes.

use std::{collections::BTreeMap, sync::Arc};

use {
    adgate_filter::{
        StatsSnapshot,
        stats::{DailyCount, DomainCount, MAX_DAILY_DAYS, RecentBlock},
    },
    axum::{
        Json, Router,
        extract::{Query, State},
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
};

use crate::{blocklist_routes::MessageResponse, state::GatewayState};

const DEFAULT_DAYS: usize = 7;
const DEFAULT_TOP_LIMIT: usize = 10;
const DEFAULT_RECENT_LIMIT: usize = 50;

/// Query parameters are kept as strings so that garbage falls back to the
/// default instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct DaysQuery {
    pub days: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DailyResponse {
    pub period: String,
    pub stats: BTreeMap<String, DailyCount>,
}

/// Positive integer from a query value, or `default`.
fn positive_or(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(stats_handler))
        .route("/daily", get(daily_handler))
        .route("/top-blocked", get(top_blocked_handler))
        .route("/recent", get(recent_handler))
        .route("/reset", post(reset_handler))
}

async fn stats_handler(State(state): State<Arc<GatewayState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn daily_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<DaysQuery>,
) -> Json<DailyResponse> {
    let days = positive_or(query.days.as_deref(), DEFAULT_DAYS).min(MAX_DAILY_DAYS);
    Json(DailyResponse {
        period: format!("{days} days"),
        stats: state.stats.daily(days),
    })
}

async fn top_blocked_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<DomainCount>> {
    let limit = positive_or(query.limit.as_deref(), DEFAULT_TOP_LIMIT);
    Json(state.stats.top_blocked(limit))
}

async fn recent_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<RecentBlock>> {
    let limit = positive_or(query.limit.as_deref(), DEFAULT_RECENT_LIMIT);
    Json(state.stats.recent(limit))
}

async fn reset_handler(State(state): State<Arc<GatewayState>>) -> Json<MessageResponse> {
    state.stats.reset();
    Json(MessageResponse {
        message: "Statistics reset successfully".into(),
    })
}
