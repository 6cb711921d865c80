use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    adgate_config::AdgateConfig,
    adgate_filter::{BlocklistEngine, StatsAggregator},
    axum::{
        Json, Router,
        extract::State,
        http::Uri,
        middleware,
        response::{IntoResponse, Response},
        routing::get,
    },
    time::{OffsetDateTime, format_description::well_known::Rfc3339},
    tokio::task::JoinHandle,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info, warn},
};

use crate::{
    blocklist_routes,
    error::{ApiError, GENERIC_ERROR_MESSAGE, redact_server_errors},
    pipeline::{filter_middleware, is_admin_path},
    state::GatewayState,
    stats_routes,
};

// ── Router ──────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let expose_errors = state.exposes_errors();
    let catch_panic = CatchPanicLayer::custom(move |panic: Box<dyn std::any::Any + Send + 'static>| {
        panic_response(panic.as_ref(), expose_errors)
    });

    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/blocklist", blocklist_routes::router())
        .nest("/api/stats", stats_routes::router());

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(metrics_handler));

    router
        .fallback(fallback_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            filter_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            redact_server_errors,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(catch_panic)
        .with_state(state)
}

fn panic_response(panic: &(dyn std::any::Any + Send), expose: bool) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "handler panicked");
    let message = if expose {
        detail.to_string()
    } else {
        GENERIC_ERROR_MESSAGE.to_string()
    };
    ApiError::Internal(message).into_response()
}

// ── Server startup ──────────────────────────────────────────────────────────

/// Start the filtering proxy and admin API and serve until shutdown.
pub async fn start_gateway(config: AdgateConfig) -> anyhow::Result<()> {
    let engine = Arc::new(BlocklistEngine::new(config.engine_options())?);
    let stats = Arc::new(StatsAggregator::new());

    #[allow(unused_mut)]
    let mut state = GatewayState::new(Arc::clone(&engine), stats, &config)?;
    #[cfg(feature = "prometheus")]
    {
        state.prometheus = Some(adgate_metrics::install_prometheus_recorder()?);
    }
    let state = Arc::new(state);

    // Load lists and run the first refresh in the background; the first
    // classified request waits for it.
    let init_engine = Arc::clone(&engine);
    tokio::spawn(async move { init_engine.initialize().await });

    let refresh_task = config
        .remote
        .refresh_interval()
        .filter(|_| engine.has_remote())
        .map(|period| spawn_refresh_task(Arc::clone(&engine), period));

    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(config.server.address()).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("adgate v{}", state.version),
        format!("listening on {addr}"),
        format!("environment: {}", config.server.environment),
        format!("lists: {}", config.lists.resolved_dir().display()),
        format!(
            "remote list: {}",
            config
                .engine_options()
                .remote_url
                .as_deref()
                .unwrap_or("disabled")
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    // Run the server with ConnectInfo for X-Forwarded-For.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(task) = refresh_task {
        task.abort();
    }
    info!("adgate stopped");
    Ok(())
}

/// Refresh the remote list every `period`. The first run happens one period
/// after start; initialization already performs the first refresh.
pub fn spawn_refresh_task(engine: Arc<BlocklistEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            interval.tick().await;
            match engine.refresh().await {
                Ok(added) => info!(added, "scheduled blocklist refresh"),
                Err(e) => warn!(error = %e, "scheduled blocklist refresh failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received, shutting down gracefully"),
        () = terminate => info!("SIGTERM received, shutting down gracefully"),
    }
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn health_handler(
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": timestamp,
        "version": state.version,
    }))
}

#[cfg(feature = "prometheus")]
async fn metrics_handler(
    State(state): State<Arc<GatewayState>>,
) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            handle.render(),
        )
            .into_response(),
        None => ApiError::NotFound("metrics recorder not installed".into()).into_response(),
    }
}

/// Unmatched requests. Proxy traffic without a target is a client error;
/// unknown admin paths are not found.
async fn fallback_handler(uri: Uri) -> ApiError {
    if is_admin_path(uri.path()) {
        ApiError::NotFound("The requested resource was not found".into())
    } else {
        ApiError::invalid_target(
            "Target URL required. Use ?url=<target> query parameter or X-Target-URL header",
        )
    }
}
