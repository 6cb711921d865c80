//! `/api/blocklist/*` admin routes.

use std::sync::Arc;

use {
    adgate_filter::{BlockReason, BlockRule, BlocklistStatus, RequestContext},
    axum::{
        Json, Router,
        extract::{State, rejection::JsonRejection},
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{error::ApiError, state::GatewayState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub url: String,
    pub blocked: bool,
    pub reason: BlockReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<BlockRule>,
}

#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub message: String,
    pub added: usize,
}

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/status", get(status_handler))
        .route("/check", post(check_handler))
        .route("/domain", post(add_domain_handler).delete(remove_domain_handler))
        .route("/whitelist", post(whitelist_handler))
        .route("/update", post(update_handler))
}

fn rejected(rejection: JsonRejection) -> ApiError {
    ApiError::validation(format!("Invalid request body: {}", rejection.body_text()))
}

fn required_domain(body: Result<Json<DomainRequest>, JsonRejection>) -> Result<String, ApiError> {
    let Json(body) = body.map_err(rejected)?;
    body.domain
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::validation("Domain is required"))
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> Json<BlocklistStatus> {
    Json(state.engine.status())
}

async fn check_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let Json(body) = body.map_err(rejected)?;
    let url = body
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::validation("URL is required"))?;
    let ctx = RequestContext {
        user_agent: body.user_agent,
        referer: body.referer,
    };
    let verdict = state.engine.check(&url, &ctx).await;
    Ok(Json(CheckResponse {
        url,
        blocked: verdict.blocked,
        reason: verdict.reason,
        rule: verdict.rule,
    }))
}

async fn add_domain_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<DomainRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let domain = required_domain(body)?;
    state.engine.add_domain(&domain).await?;
    Ok(Json(MessageResponse {
        message: format!("Domain {domain} added to blocklist"),
    }))
}

async fn remove_domain_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<DomainRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let domain = required_domain(body)?;
    state.engine.remove_domain(&domain).await?;
    Ok(Json(MessageResponse {
        message: format!("Domain {domain} removed from blocklist"),
    }))
}

async fn whitelist_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<DomainRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let domain = required_domain(body)?;
    state.engine.add_whitelist_domain(&domain).await?;
    Ok(Json(MessageResponse {
        message: format!("Domain {domain} added to whitelist"),
    }))
}

async fn update_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let added = state.engine.refresh().await?;
    info!(added, "manual blocklist update");
    Ok(Json(UpdateResponse {
        message: "Blocklists updated successfully".into(),
        added,
    }))
}
