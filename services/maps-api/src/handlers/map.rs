//! Per-layer MVT tile handler.

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use layer_query::{map_tile_query, ContextParams, QueryContext};
use maps_common::{MapsError, MapsResult};

use super::{error_response, parse_tile_params, tile_response};
use crate::cached::serve_cached;
use crate::params::{cache_bypassed, logical_request_path, parse_date, parse_flag, parse_id_list};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MapParams {
    pub z: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub format: Option<String>,
    pub cache: Option<String>,
    pub limit: Option<i64>,
    pub country_id: Option<String>,
    pub admin1_id: Option<String>,
    pub school_ids: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_weekly: Option<String>,
    pub benchmark: Option<f64>,
}

pub async fn layer_map_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(layer_id): Path<i64>,
    Query(params): Query<MapParams>,
) -> Response {
    state.metrics.record_request("map");

    match handle_map(&state, layer_id, &params).await {
        Ok(tile) => tile_response(tile),
        Err(err) => {
            if err.http_status_code() >= 500 {
                state.metrics.record_query_error();
            }
            error_response("layer_map", &err)
        }
    }
}

async fn handle_map(state: &AppState, layer_id: i64, params: &MapParams) -> MapsResult<Bytes> {
    // Reject malformed tiles before touching the database.
    let tile = parse_tile_params(&params.z, &params.x, &params.y, &params.format)?;

    let (layer, source) = state
        .replica
        .fetch_published_layer(layer_id)
        .await?
        .ok_or(MapsError::LayerNotFound(layer_id))?;

    let mut context_params = ContextParams::new(Utc::now().date_naive());
    context_params.country_ids = parse_id_list("country_id", &params.country_id)?;
    context_params.admin1_ids = parse_id_list("admin1_id", &params.admin1_id)?;
    context_params.school_ids = parse_id_list("school_ids", &params.school_ids)?;
    context_params.start_date = parse_date("start_date", &params.start_date)?;
    context_params.end_date = parse_date("end_date", &params.end_date)?;
    context_params.is_weekly = parse_flag(&params.is_weekly);
    context_params.benchmark_override = params.benchmark;
    context_params.row_limit = params.limit;
    context_params.zoom = Some(tile.zoom);
    let ctx = QueryContext::build(&layer, &source, context_params)?;

    let request_path = logical_request_path(
        &format!("/api/accounts/layers/{}/map/", layer_id),
        &[
            ("z", params.z.clone()),
            ("x", params.x.clone()),
            ("y", params.y.clone()),
            ("format", params.format.clone()),
            ("limit", params.limit.map(|v| v.to_string())),
            ("country_id", params.country_id.clone()),
            ("admin1_id", params.admin1_id.clone()),
            ("school_ids", params.school_ids.clone()),
            ("start_date", params.start_date.clone()),
            ("end_date", params.end_date.clone()),
            ("is_weekly", params.is_weekly.clone()),
            ("benchmark", params.benchmark.map(|v| v.to_string())),
            ("cache", params.cache.clone()),
        ],
    );
    let bypass = cache_bypassed(&params.cache);

    // L1 holds fresh tiles only; bypass skips it so a forced recompute
    // repopulates both levels.
    if !bypass {
        if let Some(hit) = state.tile_cache.get(&request_path).await {
            return Ok(hit);
        }
    }

    let query = map_tile_query(&ctx, &tile);
    let value = serve_cached(state, &request_path, bypass, || async move {
        state.replica.fetch_tile(&query).await
    })
    .await?;

    state.tile_cache.set(&request_path, value.clone()).await;

    Ok(value)
}
