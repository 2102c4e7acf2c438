// src/server/admin.rs

//! The admin HTTP surface: stats, purge, cleanup, mirror refresh, and the
//! Prometheus metrics endpoint. Runs on its own port, apart from the data
//! path. Mutating routes require the configured shared secret as a bearer
//! token.

use crate::core::metrics::gather_metrics;
use crate::core::state::ProxyState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Checks the bearer token on mutating routes. An empty configured secret
/// disables the check.
fn authorize(state: &ProxyState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let secret = &state.config.admin.secret;
    if secret.is_empty() {
        return Ok(());
    }
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(secret.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn stats_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    let cache = state.cache_stats();
    let mirrors: serde_json::Map<String, serde_json::Value> = state
        .bindings
        .snapshot()
        .into_iter()
        .map(|(kind, url)| (kind.as_str().to_string(), json!(url.as_str())))
        .collect();
    Json(json!({
        "uptime_secs": state.stats.uptime_secs(),
        "total_requests": state.stats.get_total_requests(),
        "cache": {
            "total_size": cache.total_size,
            "item_count": cache.item_count,
            "stale_count": cache.stale_count,
            "hit_count": cache.hit_count,
            "miss_count": cache.miss_count,
            "hit_rate": cache.hit_rate(),
        },
        "mirrors": mirrors,
    }))
}

async fn purge_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }
    match state.cache_purge().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            error!("Cache purge failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn cleanup_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }
    match state.cache_cleanup().await {
        Ok(result) => Json(json!({ "ok": true, "result": result })).into_response(),
        Err(e) => {
            error!("Cache cleanup failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn refresh_mirrors_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }
    state.mirrors_refresh().await;
    let mirrors: serde_json::Map<String, serde_json::Value> = state
        .bindings
        .snapshot()
        .into_iter()
        .map(|(kind, url)| (kind.as_str().to_string(), json!(url.as_str())))
        .collect();
    Json(json!({ "ok": true, "mirrors": mirrors })).into_response()
}

async fn metrics_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    // Refresh cache gauges right before gathering.
    let cache = state.cache_stats();
    crate::core::metrics::CACHE_SIZE_BYTES.set(cache.total_size as f64);
    crate::core::metrics::CACHE_ITEMS.set(cache.item_count as f64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Runs the admin HTTP server until shutdown.
pub async fn run_admin_server(state: Arc<ProxyState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.admin.port;
    let app = Router::new()
        .route("/stats", get(stats_handler))
        .route("/purge", post(purge_handler))
        .route("/cleanup", post(cleanup_handler))
        .route("/mirrors/refresh", post(refresh_mirrors_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Admin server listening on http://{}/stats", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind admin server on port {}: {}", port, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Admin server shutting down.");
        })
        .await
    {
        error!("Admin server error: {e}");
    }
}
