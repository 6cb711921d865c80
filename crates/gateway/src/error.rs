//! API error type. Every error response has the shape `{code, error}`.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Request, State},
        http::StatusCode,
        middleware::Next,
        response::{IntoResponse, Response},
    },
    tracing::{error, warn},
};

use crate::state::GatewayState;

pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
pub const INVALID_TARGET: &str = "INVALID_TARGET";
pub const UPSTREAM_FAILED: &str = "UPSTREAM_FAILED";
pub const REMOTE_LIST_FAILED: &str = "REMOTE_LIST_FAILED";
pub const REMOTE_LIST_DISABLED: &str = "REMOTE_LIST_DISABLED";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Body text for internal failures when details are hidden.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";
/// Body text for remote list failures when details are hidden.
pub const REMOTE_LIST_ERROR_MESSAGE: &str = "Failed to update blocklists";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidTarget(String),

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Filter(#[from] adgate_filter::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        use adgate_filter::Error as F;
        match self {
            Self::Validation(_) | Self::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Filter(e) => match e {
                F::Validation(_) | F::Classification { .. } | F::RemoteDisabled => {
                    StatusCode::BAD_REQUEST
                },
                F::RemoteFetch(_) | F::RemoteStatus(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        use adgate_filter::Error as F;
        match self {
            Self::Validation(_) => VALIDATION_FAILED,
            Self::InvalidTarget(_) => INVALID_TARGET,
            Self::Upstream(_) => UPSTREAM_FAILED,
            Self::NotFound(_) => NOT_FOUND,
            Self::Internal(_) => INTERNAL_ERROR,
            Self::Filter(e) => match e {
                F::Validation(_) => VALIDATION_FAILED,
                F::Classification { .. } => INVALID_TARGET,
                F::RemoteDisabled => REMOTE_LIST_DISABLED,
                F::RemoteFetch(_) | F::RemoteStatus(_) => REMOTE_LIST_FAILED,
                _ => INTERNAL_ERROR,
            },
        }
    }
}

impl ApiError {
    /// Replacement message for production responses, or `None` when the
    /// regular message carries no internal detail.
    pub fn redacted_message(&self) -> Option<&'static str> {
        use adgate_filter::Error as F;
        match self {
            Self::Internal(_) => Some(GENERIC_ERROR_MESSAGE),
            Self::Filter(F::RemoteFetch(_) | F::RemoteStatus(_)) => Some(REMOTE_LIST_ERROR_MESSAGE),
            Self::Filter(_) if self.status().is_server_error() => Some(GENERIC_ERROR_MESSAGE),
            _ => None,
        }
    }
}

/// Production-safe body attached to error responses that carry internal
/// detail. [`redact_server_errors`] swaps it in when details are hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redacted {
    pub code: &'static str,
    pub message: &'static str,
}

/// `{code, error}` body with the given status.
pub fn api_error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "code": code,
            "error": error.into(),
        })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }
        let mut response = api_error_response(status, self.code(), self.to_string());
        if let Some(message) = self.redacted_message() {
            response.extensions_mut().insert(Redacted {
                code: self.code(),
                message,
            });
        }
        response
    }
}

/// Replace error bodies that carry internal detail with their generic
/// message unless the environment exposes errors.
pub async fn redact_server_errors(
    State(state): State<Arc<GatewayState>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if state.exposes_errors() {
        return response;
    }
    match response.extensions().get::<Redacted>().copied() {
        Some(redacted) => api_error_response(response.status(), redacted.code, redacted.message),
        None => response,
    }
}
