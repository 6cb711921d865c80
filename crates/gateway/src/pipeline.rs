//! Request pipeline: resolves the proxy target of an inbound request,
//! rejects targets that cannot be forwarded, classifies the rest and either
//! answers with a block response or hands the request to the forwarder.

use std::{sync::Arc, time::Instant};

use {
    adgate_filter::{RequestContext, target_host},
    axum::{
        Json,
        extract::{Request, State},
        http::{HeaderMap, StatusCode, Uri, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    tracing::{debug, info},
};

use crate::{forward, state::GatewayState};

/// Header carrying the proxy target when no `url` query parameter is given.
pub const TARGET_HEADER: &str = "x-target-url";

/// Admin and health paths that are never classified when addressed directly.
pub fn is_admin_path(path: &str) -> bool {
    path == "/api"
        || path.starts_with("/api/")
        || path == "/health"
        || path == "/metrics"
}

/// Resolve the proxy target of a request.
///
/// Priority: `url` query parameter, `X-Target-URL` header, absolute-form
/// request URI, then a path that embeds an absolute URL
/// (`/https://host/path`). Origin-form admin requests resolve to nothing.
pub fn resolve_target(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let absolute_form = uri.scheme().is_some() && uri.authority().is_some();
    if !absolute_form && is_admin_path(uri.path()) {
        return None;
    }

    if let Some(query) = uri.query()
        && let Some(target) = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "url" && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_string())
    {
        return Some(target);
    }

    if let Some(target) = headers
        .get(TARGET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(target.to_string());
    }

    if absolute_form {
        return Some(uri.to_string());
    }

    let embedded = uri.path().trim_start_matches('/');
    if embedded.contains("://") {
        return Some(match uri.query() {
            Some(query) => format!("{embedded}?{query}"),
            None => embedded.to_string(),
        });
    }
    None
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Filtering middleware applied to every route.
pub async fn filter_middleware(
    State(state): State<Arc<GatewayState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(target) = resolve_target(req.uri(), req.headers()) else {
        return next.run(req).await;
    };
    // Unforwardable targets are rejected before classification or counting.
    let url = match forward::outbound_url(&target) {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };

    let ctx = RequestContext {
        user_agent: header_string(req.headers(), header::USER_AGENT),
        referer: header_string(req.headers(), header::REFERER),
    };

    let started = Instant::now();
    let verdict = state.engine.check(&target, &ctx).await;
    debug!(
        url = %target,
        blocked = verdict.blocked,
        elapsed_us = started.elapsed().as_micros() as u64,
        "classification finished"
    );

    if verdict.blocked {
        let host = target_host(&target).unwrap_or_else(|| "unknown".to_string());
        state.stats.record_blocked(&host);
        info!(url = %target, reason = %verdict.reason, "blocked request");
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "blocked": true,
                "reason": verdict.reason,
                "url": target,
            })),
        )
            .into_response();
    }

    state.stats.record_allowed();
    match forward::forward(&state, url, req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    fn resolve(uri: &str, target_header: Option<&str>) -> Option<String> {
        let uri: Uri = uri.parse().unwrap();
        let mut headers = HeaderMap::new();
        if let Some(value) = target_header {
            headers.insert(TARGET_HEADER, HeaderValue::from_str(value).unwrap());
        }
        resolve_target(&uri, &headers)
    }

    #[test]
    fn query_parameter_wins() {
        assert_eq!(
            resolve(
                "/?url=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1",
                Some("https://other.com/")
            ),
            Some("https://example.com/a?b=1".into())
        );
    }

    #[test]
    fn header_is_second() {
        assert_eq!(
            resolve("/anything", Some("https://example.com/")),
            Some("https://example.com/".into())
        );
        assert_eq!(resolve("/?url=", Some("https://example.com/")), Some("https://example.com/".into()));
    }

    #[test]
    fn absolute_form_uri() {
        assert_eq!(
            resolve("http://ads.example.com/banner.js", None),
            Some("http://ads.example.com/banner.js".into())
        );
        // Absolute-form requests are proxy traffic even when the path looks administrative.
        assert_eq!(
            resolve("http://example.com/api/users", None),
            Some("http://example.com/api/users".into())
        );
    }

    #[test]
    fn embedded_absolute_path() {
        assert_eq!(
            resolve("/https://example.com/page?q=1", None),
            Some("https://example.com/page?q=1".into())
        );
    }

    #[test]
    fn admin_paths_are_skipped() {
        assert_eq!(resolve("/api/stats", Some("https://doubleclick.net/")), None);
        assert_eq!(resolve("/health?url=https://doubleclick.net/", None), None);
        assert_eq!(resolve("/metrics", None), None);
    }

    #[test]
    fn no_target() {
        assert_eq!(resolve("/", None), None);
        assert_eq!(resolve("/some/path?x=1", None), None);
        assert_eq!(resolve("/", Some("   ")), None);
    }

    #[test]
    fn admin_path_detection() {
        assert!(is_admin_path("/api/blocklist/status"));
        assert!(is_admin_path("/health"));
        assert!(!is_admin_path("/healthz"));
        assert!(!is_admin_path("/apis"));
    }
}
