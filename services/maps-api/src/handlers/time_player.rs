//! Historical year-by-year time-player handlers.
//!
//! The v2 endpoint renders one MVT feature per (school, year); the JSON
//! endpoint returns one object per school with a year-indexed status map.
//! Both shapes only make sense over a live measurement feed.

use axum::{
    extract::{Extension, Query},
    response::Response,
};
use bytes::Bytes;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use layer_query::{
    time_player_rows_query, time_player_tile_query, ContextParams, QueryContext,
};
use maps_common::{MapsError, MapsResult};

use super::{error_response, json_response, parse_tile_params, tile_response};
use crate::cached::serve_cached;
use crate::params::{cache_bypassed, logical_request_path, parse_id_list};
use crate::state::AppState;

/// Years of history shown when `start_year` is not supplied.
const DEFAULT_HISTORY_YEARS: i32 = 5;

#[derive(Debug, Deserialize)]
pub struct TimePlayerParams {
    pub layer_id: Option<i64>,
    pub country_id: Option<String>,
    pub start_year: Option<i32>,
    pub z: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub format: Option<String>,
    pub cache: Option<String>,
}

#[derive(Debug, Serialize)]
struct TimePlayerSchool {
    school_id: i64,
    years: BTreeMap<i32, YearStatus>,
}

#[derive(Debug, Serialize)]
struct YearStatus {
    field_status: String,
    is_rt_connected: bool,
}

pub async fn time_player_tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TimePlayerParams>,
) -> Response {
    state.metrics.record_request("time_player");

    match handle_tile(&state, &params).await {
        Ok(tile) => tile_response(tile),
        Err(err) => {
            if err.http_status_code() >= 500 {
                state.metrics.record_query_error();
            }
            error_response("time_player_map", &err)
        }
    }
}

pub async fn time_player_rows_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TimePlayerParams>,
) -> Response {
    state.metrics.record_request("time_player");

    match handle_rows(&state, &params).await {
        Ok(body) => json_response(body),
        Err(err) => {
            if err.http_status_code() >= 500 {
                state.metrics.record_query_error();
            }
            error_response("time_player_rows", &err)
        }
    }
}

async fn handle_tile(state: &AppState, params: &TimePlayerParams) -> MapsResult<Bytes> {
    let tile = parse_tile_params(&params.z, &params.x, &params.y, &params.format)?;
    let (ctx, layer_id, start_year) = build_context(state, params, Some(tile.zoom)).await?;

    let request_path = logical_request_path(
        "/api/accounts/time-players/v2/",
        &[
            ("layer_id", Some(layer_id.to_string())),
            ("country_id", params.country_id.clone()),
            ("start_year", Some(start_year.to_string())),
            ("z", params.z.clone()),
            ("x", params.x.clone()),
            ("y", params.y.clone()),
            ("format", params.format.clone()),
            ("cache", params.cache.clone()),
        ],
    );
    let bypass = cache_bypassed(&params.cache);

    let query = time_player_tile_query(&ctx, &tile, start_year);
    serve_cached(state, &request_path, bypass, || async move {
        state.replica.fetch_tile(&query).await
    })
    .await
}

async fn handle_rows(state: &AppState, params: &TimePlayerParams) -> MapsResult<Bytes> {
    let (ctx, layer_id, start_year) = build_context(state, params, None).await?;

    let request_path = logical_request_path(
        "/api/connection_statistics/time-players/",
        &[
            ("layer_id", Some(layer_id.to_string())),
            ("country_id", params.country_id.clone()),
            ("start_year", Some(start_year.to_string())),
            ("cache", params.cache.clone()),
        ],
    );
    let bypass = cache_bypassed(&params.cache);

    serve_cached(state, &request_path, bypass, || async move {
        let rows = state
            .replica
            .fetch_time_player_rows(&time_player_rows_query(&ctx, start_year))
            .await?;

        let mut schools: BTreeMap<i64, BTreeMap<i32, YearStatus>> = BTreeMap::new();
        for row in rows {
            schools.entry(row.school_id).or_default().insert(
                row.year,
                YearStatus {
                    field_status: row.field_status,
                    is_rt_connected: row.is_rt_connected,
                },
            );
        }

        let body: Vec<TimePlayerSchool> = schools
            .into_iter()
            .map(|(school_id, years)| TimePlayerSchool { school_id, years })
            .collect();

        Ok(Bytes::from(serde_json::to_vec(&body)?))
    })
    .await
}

async fn build_context(
    state: &AppState,
    params: &TimePlayerParams,
    zoom: Option<u32>,
) -> MapsResult<(QueryContext, i64, i32)> {
    let layer_id = params
        .layer_id
        .ok_or_else(|| MapsError::MissingParameter("layer_id".into()))?;

    let (layer, source) = state
        .replica
        .fetch_published_layer(layer_id)
        .await?
        .ok_or(MapsError::LayerNotFound(layer_id))?;

    let today = Utc::now().date_naive();
    let mut context_params = ContextParams::new(today);
    context_params.country_ids = parse_id_list("country_id", &params.country_id)?;
    context_params.zoom = zoom;
    let ctx = QueryContext::build(&layer, &source, context_params)?;

    if !ctx.is_live() {
        return Err(MapsError::InvalidParameter {
            param: "layer_id".into(),
            message: "time player requires a live layer".into(),
        });
    }

    let start_year = params.start_year.unwrap_or(today.year() - DEFAULT_HISTORY_YEARS);

    Ok((ctx, layer_id, start_year))
}
