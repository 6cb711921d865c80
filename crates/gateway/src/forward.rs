//! Proxy forwarder: relays an allowed request to its origin and sanitizes
//! the response on the way back.

use std::{net::SocketAddr, time::Instant};

use {
    axum::{
        body::Body,
        extract::{ConnectInfo, Request},
        http::{HeaderMap, HeaderName, HeaderValue, header},
        response::Response,
    },
    tracing::{debug, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use adgate_metrics::{counter, histogram, names};

use crate::{error::ApiError, pipeline::TARGET_HEADER, state::GatewayState};

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Target-URL";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Upstream response headers that leak cookies or server details.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "set-cookie",
    "x-powered-by",
    "server",
    "x-aspnet-version",
    "x-aspnetmvc-version",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Parse and validate a forwarding target: `http` or `https` with a host.
pub fn outbound_url(target: &str) -> Result<Url, ApiError> {
    let url = Url::parse(target.trim())
        .map_err(|_| ApiError::invalid_target("The provided target URL is invalid"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::invalid_target(format!(
            "Unsupported target scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ApiError::invalid_target("The provided target URL has no host"));
    }
    Ok(url)
}

/// Headers sent upstream: the inbound set minus routing and hop-by-hop
/// headers, plus `X-Forwarded-For` / `X-Forwarded-Proto`.
pub fn upstream_headers(inbound: &HeaderMap, client_ip: Option<SocketAddr>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 2);
    for (name, value) in inbound {
        if *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || name.as_str() == TARGET_HEADER
            || name.as_str() == "x-forwarded-for"
            || is_hop_by_hop(name)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let prior = inbound
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    let chain = match (prior.is_empty(), client_ip) {
        (true, Some(addr)) => Some(addr.ip().to_string()),
        (false, Some(addr)) => Some(format!("{prior}, {}", addr.ip())),
        (false, None) => Some(prior),
        (true, None) => None,
    };
    if let Some(value) = chain.and_then(|c| HeaderValue::from_str(&c).ok()) {
        headers.insert("x-forwarded-for", value);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    headers
}

/// Strip sensitive and hop-by-hop headers and add the proxy CORS headers.
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    for name in STRIPPED_RESPONSE_HEADERS.iter().chain(HOP_BY_HOP_HEADERS) {
        headers.remove(*name);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

/// Forward `req` to `url` (validated with [`outbound_url`]). The upstream
/// body is streamed back as it arrives.
pub async fn forward(
    state: &GatewayState,
    url: Url,
    req: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ApiError::validation(format!("Request body rejected: {e}")))?;
    let headers = upstream_headers(&parts.headers, client_ip);

    debug!(method = %parts.method, url = %url, "proxying request");
    let started = Instant::now();
    let result = state
        .http
        .request(parts.method, url.clone())
        .headers(headers)
        .body(body)
        .send()
        .await;

    #[cfg(feature = "metrics")]
    histogram!(names::PROXY_FORWARD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    let upstream = match result {
        Ok(resp) => resp,
        Err(e) => {
            warn!(url = %url, error = %e, "upstream request failed");
            #[cfg(feature = "metrics")]
            counter!(names::PROXY_FORWARDS_TOTAL, "result" => "error").increment(1);
            return Err(ApiError::Upstream(
                "Failed to proxy request to target URL".into(),
            ));
        },
    };

    #[cfg(feature = "metrics")]
    counter!(names::PROXY_FORWARDS_TOTAL, "result" => "ok").increment(1);
    debug!(
        url = %url,
        status = upstream.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upstream responded"
    );

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    sanitize_response_headers(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
