//! Info-panel aggregate and per-school detail handler.
//!
//! The response shape depends on whether explicit school ids were
//! requested: without them the payload is the count-by-bucket aggregate
//! plus the gap-filled daily graph; with them it is a per-school detail
//! list including the weekly snapshot.

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use layer_query::{info_query, school_detail_query, series_query, ContextParams, LayerSql, QueryContext};
use maps_common::{fill_daily_gaps, units, DataLayer, LayerType, MapsError, MapsResult};

use super::{error_response, json_response};
use crate::cached::serve_cached;
use crate::params::{cache_bypassed, logical_request_path, parse_date, parse_flag, parse_id_list};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    pub country_id: Option<String>,
    pub admin1_id: Option<String>,
    pub school_ids: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_weekly: Option<String>,
    pub benchmark: Option<f64>,
    pub cache: Option<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    layer_id: i64,
    layer_type: &'static str,
    benchmark: Option<f64>,
    base_benchmark: Option<f64>,
    unit: Option<String>,
    good: i64,
    moderate: i64,
    bad: i64,
    unknown: i64,
    measured: i64,
    total_schools: i64,
    graph: Vec<GraphPoint>,
}

#[derive(Debug, Serialize)]
struct GraphPoint {
    date: NaiveDate,
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SchoolInfo {
    school_id: i64,
    name: Option<String>,
    country_id: Option<i64>,
    admin1_id: Option<i64>,
    connectivity_status: Option<String>,
    is_rt_connected: bool,
    field_status: String,
    value: Option<f64>,
    attribute: Option<String>,
    week: WeekSnapshot,
}

#[derive(Debug, Serialize)]
struct WeekSnapshot {
    connectivity_speed: Option<f64>,
    connectivity: Option<bool>,
}

pub async fn layer_info_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(layer_id): Path<i64>,
    Query(params): Query<InfoParams>,
) -> Response {
    state.metrics.record_request("info");

    match handle_info(&state, layer_id, &params).await {
        Ok(body) => json_response(body),
        Err(err) => {
            if err.http_status_code() >= 500 {
                state.metrics.record_query_error();
            }
            error_response("layer_info", &err)
        }
    }
}

async fn handle_info(state: &AppState, layer_id: i64, params: &InfoParams) -> MapsResult<Bytes> {
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
    let ctx = QueryContext::build(&layer, &source, context_params)?;

    let request_path = logical_request_path(
        &format!("/api/accounts/layers/{}/info/", layer_id),
        &[
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

    serve_cached(state, &request_path, bypass, || async move {
        compute_info(state, &layer, &ctx).await
    })
    .await
}

/// Pure computation behind the cache wrapper.
async fn compute_info(state: &AppState, layer: &DataLayer, ctx: &QueryContext) -> MapsResult<Bytes> {
    if !ctx.school_ids.is_empty() {
        let rows = state.replica.fetch_school_details(&school_detail_query(ctx)).await?;

        let body: Vec<SchoolInfo> = rows
            .into_iter()
            .map(|row| SchoolInfo {
                school_id: row.id,
                name: row.name,
                country_id: row.country_id,
                admin1_id: row.admin1_id,
                connectivity_status: row.connectivity_status,
                is_rt_connected: row.is_rt_connected,
                field_status: row.field_status,
                value: row.measured_value.map(units::round2),
                attribute: row.attribute_value,
                week: WeekSnapshot {
                    connectivity_speed: row.week_connectivity_speed.map(units::round2),
                    connectivity: row.week_connectivity,
                },
            })
            .collect();

        return Ok(Bytes::from(serde_json::to_vec(&body)?));
    }

    let counts = state.replica.fetch_info(&info_query(ctx)).await?;

    // Static layers have no time dimension; the graph is live-only.
    let graph = if ctx.is_live() {
        let rows = state.replica.fetch_series(&series_query(ctx)).await?;
        let sparse: Vec<(NaiveDate, f64)> = rows
            .iter()
            .filter_map(|row| row.avg_value.map(|value| (row.date, value)))
            .collect();

        fill_daily_gaps(&ctx.window, &sparse)
            .into_iter()
            .map(|(date, value)| GraphPoint { date, value: value.map(units::round2) })
            .collect()
    } else {
        Vec::new()
    };

    let (benchmark, base_benchmark) = match &ctx.kind {
        LayerSql::Live { benchmark, base_benchmark, .. } => {
            (Some(units::round2(*benchmark)), Some(units::round2(*base_benchmark)))
        }
        LayerSql::Static { .. } => (None, None),
    };

    let body = InfoResponse {
        layer_id: layer.id,
        layer_type: match layer.layer_type {
            LayerType::Live => "LIVE",
            LayerType::Static => "STATIC",
        },
        benchmark,
        base_benchmark,
        unit: ctx.display_unit.map(|u| u.to_string()),
        good: counts.good,
        moderate: counts.moderate,
        bad: counts.bad,
        unknown: counts.unknown,
        measured: counts.measured,
        total_schools: counts.total_schools,
        graph,
    };

    Ok(Bytes::from(serde_json::to_vec(&body)?))
}
