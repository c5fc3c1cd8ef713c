//! Publish transition and operator cache invalidation.

use axum::{
    extract::{Extension, Path},
    response::Response,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use maps_common::MapsResult;

use super::{error_response, json_response};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    /// Logical-key prefix, e.g. `/api/accounts/layers/7/`.
    pub prefix: String,
    /// Hard deletes; soft marks entries for stale-while-revalidate.
    #[serde(default = "default_hard")]
    pub hard: bool,
}

fn default_hard() -> bool {
    true
}

/// `POST /api/accounts/layers/:id/publish`
///
/// Validates the configuration, flips the status, rebuilds the
/// layer↔country facts, and hard-invalidates everything cached under the
/// layer's namespaces.
pub async fn publish_layer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(layer_id): Path<i64>,
) -> Response {
    match publish(&state, layer_id).await {
        Ok(body) => json_response(body),
        Err(err) => error_response("publish_layer", &err),
    }
}

async fn publish(state: &AppState, layer_id: i64) -> MapsResult<Bytes> {
    let layer = state.replica.publish_layer(layer_id).await?;

    let prefixes = [
        format!("/api/accounts/layers/{}/", layer_id),
        // Time-player keys carry the layer id in the query string, so those
        // namespaces are cleared wholesale.
        "/api/accounts/time-players/".to_string(),
        "/api/connection_statistics/time-players/".to_string(),
    ];

    {
        let mut cache = state.cache.lock().await;
        for prefix in &prefixes {
            if let Err(err) = cache.invalidate_prefix(prefix, true).await {
                warn!(prefix = %prefix, error = %err, "cache invalidation failed");
            }
        }
    }
    state.tile_cache.clear().await;

    let body = serde_json::json!({
        "id": layer.id,
        "code": layer.code,
        "status": layer.status.as_str(),
    });
    Ok(Bytes::from(serde_json::to_vec(&body)?))
}

/// `POST /api/cache/invalidate`
pub async fn cache_invalidate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    let invalidated = {
        let mut cache = state.cache.lock().await;
        cache.invalidate_prefix(&request.prefix, request.hard).await
    };

    match invalidated {
        Ok(count) => {
            if request.hard {
                state.tile_cache.clear().await;
            }
            let body = serde_json::json!({ "invalidated": count, "hard": request.hard });
            json_response(Bytes::from(body.to_string()))
        }
        Err(err) => error_response("cache_invalidate", &err),
    }
}
