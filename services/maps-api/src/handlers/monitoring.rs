//! Health checks, Prometheus metrics, and JSON stats.

use axum::{
    body::Body,
    extract::Extension,
    http::{header, StatusCode},
    response::Response,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::state::AppState;

pub async fn health_handler() -> &'static str {
    "OK"
}

/// Readiness: the replica must answer; the cache is allowed to be down.
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.replica.ping().await {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("ready"))
            .unwrap(),
        Err(err) => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "error": err.public_message() }).to_string(),
            ))
            .unwrap(),
    }
}

/// Prometheus exposition.
pub async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

/// JSON counter snapshot plus cache and queue gauges.
pub async fn api_metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let tile_stats = state.tile_cache.stats();
    let queue_depth = state.refresh.lock().await.queue_depth().await.unwrap_or(0);

    let body = serde_json::json!({
        "service": state.metrics.snapshot(),
        "tile_cache": {
            "hits": tile_stats.hits.load(Ordering::Relaxed),
            "misses": tile_stats.misses.load(Ordering::Relaxed),
            "evictions": tile_stats.evictions.load(Ordering::Relaxed),
            "entry_count": tile_stats.entry_count.load(Ordering::Relaxed),
            "size_bytes": tile_stats.size_bytes.load(Ordering::Relaxed),
            "hit_rate": tile_stats.hit_rate(),
        },
        "refresh_queue_depth": queue_depth,
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
