//! Statement builders for the data-layer query shapes.
//!
//! Map tile (MVT), info aggregate, time series, per-school detail, and the
//! two time-player shapes. All of them read the replica tables `schools`,
//! `school_daily_status` and `school_weekly_status`.

use crate::case;
use crate::context::{LayerSql, QueryContext};
use crate::sql::{envelope_geom_sql, ParamSink, SqlQuery, SqlValue};
use maps_common::TileRequest;

const MVT_LAYER_NAME: &str = "default";
const MVT_EXTENT: u32 = 4096;

/// Per-school measurement aggregate over the context window (live layers).
///
/// Daily windows filter on dates; weekly windows address the aggregate
/// table through ISO `year * 100 + week` codes.
fn measurements_cte(ctx: &QueryContext, sink: &mut ParamSink) -> String {
    if ctx.is_weekly {
        let codes = sink.bind(SqlValue::IntArray(ctx.window.week_codes()));
        let sources = sink.bind(SqlValue::TextArray(ctx.live_source_types.clone()));
        format!(
            "SELECT sws.school_id AS school_id, AVG({val})::double precision AS avg_value \
             FROM school_weekly_status sws \
             WHERE (sws.year * 100 + sws.week) = ANY({codes}) \
             AND sws.live_data_source = ANY({sources}) \
             GROUP BY sws.school_id",
            val = ctx.value_sql("sws"),
        )
    } else {
        let start = sink.bind(SqlValue::Date(ctx.window.start));
        let end = sink.bind(SqlValue::Date(ctx.window.end));
        let sources = sink.bind(SqlValue::TextArray(ctx.live_source_types.clone()));
        format!(
            "SELECT sds.school_id AS school_id, AVG({val})::double precision AS avg_value \
             FROM school_daily_status sds \
             WHERE sds.date >= {start} AND sds.date <= {end} \
             AND sds.live_data_source = ANY({sources}) \
             GROUP BY sds.school_id",
            val = ctx.value_sql("sds"),
        )
    }
}

/// Narrowing filters on the schools table, plus the pre-validated advanced
/// fragments. Returned text starts with ` AND` or is empty.
fn school_filters(ctx: &QueryContext, sink: &mut ParamSink) -> String {
    let mut clauses = String::new();
    if !ctx.country_ids.is_empty() {
        let ids = sink.bind(SqlValue::IntArray(ctx.country_ids.clone()));
        clauses.push_str(&format!(" AND s.country_id = ANY({ids})"));
    }
    if !ctx.admin1_ids.is_empty() {
        let ids = sink.bind(SqlValue::IntArray(ctx.admin1_ids.clone()));
        clauses.push_str(&format!(" AND s.admin1_id = ANY({ids})"));
    }
    if !ctx.school_ids.is_empty() {
        let ids = sink.bind(SqlValue::IntArray(ctx.school_ids.clone()));
        clauses.push_str(&format!(" AND s.id = ANY({ids})"));
    }
    for fragment in &ctx.advanced_filters {
        clauses.push_str(&format!(" AND ({fragment})"));
    }
    clauses
}

/// Classification expression for the current layer kind.
///
/// Live layers classify the windowed average (already in the display unit);
/// static layers classify the school attribute through the legend.
fn classification_sql(ctx: &QueryContext, sink: &mut ParamSink) -> String {
    match &ctx.kind {
        LayerSql::Live { benchmark, base_benchmark, is_reverse } => {
            case::live_case("m.avg_value", *benchmark, *base_benchmark, *is_reverse, sink)
        }
        LayerSql::Static { legend } => case::static_case(&ctx.value_sql("s"), legend, sink),
    }
}

/// MVT tile statement: classified schools clipped to the tile envelope.
///
/// The feature count is capped; unfiltered low-zoom tiles are randomly
/// ordered so repeated calls sample different schools instead of walking
/// the table in index order.
pub fn map_tile_query(ctx: &QueryContext, tile: &TileRequest) -> SqlQuery {
    let mut sink = ParamSink::new();
    let bounds = envelope_geom_sql(&tile.envelope(), &mut sink);

    let (ctes, rt_flag, join) = if ctx.is_live() {
        (
            format!(", measurements AS ({})", measurements_cte(ctx, &mut sink)),
            "(m.school_id IS NOT NULL)",
            " LEFT JOIN measurements m ON m.school_id = s.id",
        )
    } else {
        (String::new(), "FALSE", "")
    };

    let status = classification_sql(ctx, &mut sink);
    let filters = school_filters(ctx, &mut sink);
    let order = if ctx.randomize { " ORDER BY random()" } else { "" };
    let limit = sink.bind(SqlValue::Int(ctx.row_limit));

    let sql = format!(
        "WITH tile_bounds AS (SELECT {bounds} AS geom){ctes}, \
         features AS (\
         SELECT s.id AS id, {rt_flag} AS is_rt_connected, {status} AS field_status, \
         ST_AsMVTGeom(ST_Transform(s.geopoint, 3857), b.geom) AS geom \
         FROM schools s \
         CROSS JOIN tile_bounds b{join} \
         WHERE ST_Intersects(ST_Transform(s.geopoint, 3857), b.geom){filters}{order} \
         LIMIT {limit}\
         ) \
         SELECT ST_AsMVT(f, '{MVT_LAYER_NAME}', {MVT_EXTENT}, 'geom') AS tile FROM features f",
    );

    sink.finish(sql)
}

/// Count-by-bucket aggregate over the filtered school set.
///
/// A plain aggregate over the classified subquery always produces exactly
/// one row, so an empty window yields zero counts rather than no rows.
pub fn info_query(ctx: &QueryContext) -> SqlQuery {
    let mut sink = ParamSink::new();

    let (ctes, measured, join) = if ctx.is_live() {
        (
            format!("WITH measurements AS ({}) ", measurements_cte(ctx, &mut sink)),
            "m.avg_value".to_string(),
            " LEFT JOIN measurements m ON m.school_id = s.id",
        )
    } else {
        (String::new(), ctx.value_sql("s"), "")
    };

    let status = classification_sql(ctx, &mut sink);
    let filters = school_filters(ctx, &mut sink);

    let sql = format!(
        "{ctes}\
         SELECT \
         COUNT(*) FILTER (WHERE c.field_status = 'good') AS good, \
         COUNT(*) FILTER (WHERE c.field_status = 'moderate') AS moderate, \
         COUNT(*) FILTER (WHERE c.field_status = 'bad') AS bad, \
         COUNT(*) FILTER (WHERE c.field_status = 'unknown') AS unknown, \
         COUNT(c.measured_value) AS measured, \
         COUNT(*) AS total_schools \
         FROM (\
         SELECT s.id AS id, {measured} AS measured_value, {status} AS field_status \
         FROM schools s{join} \
         WHERE TRUE{filters}\
         ) c",
    );

    sink.finish(sql)
}

/// Daily averages of the measured column across the window, grouped per
/// school when specific schools were requested.
pub fn series_query(ctx: &QueryContext) -> SqlQuery {
    let mut sink = ParamSink::new();

    let start = sink.bind(SqlValue::Date(ctx.window.start));
    let end = sink.bind(SqlValue::Date(ctx.window.end));
    let sources = sink.bind(SqlValue::TextArray(ctx.live_source_types.clone()));
    let filters = school_filters(ctx, &mut sink);

    let (school_col, school_group) = if ctx.school_ids.is_empty() {
        ("NULL::bigint AS school_id", "")
    } else {
        ("sds.school_id AS school_id", ", sds.school_id")
    };

    let sql = format!(
        "SELECT sds.date AS date, {school_col}, AVG({val})::double precision AS avg_value \
         FROM school_daily_status sds \
         JOIN schools s ON s.id = sds.school_id \
         WHERE sds.date >= {start} AND sds.date <= {end} \
         AND sds.live_data_source = ANY({sources}){filters} \
         GROUP BY sds.date{school_group} \
         ORDER BY sds.date{school_group}",
        val = ctx.value_sql("sds"),
    );

    sink.finish(sql)
}

/// Full classification plus weekly snapshot fields for explicit school ids.
pub fn school_detail_query(ctx: &QueryContext) -> SqlQuery {
    let mut sink = ParamSink::new();

    let (ctes, measured, attribute, rt_flag, join) = if ctx.is_live() {
        (
            format!("WITH measurements AS ({}) ", measurements_cte(ctx, &mut sink)),
            "m.avg_value".to_string(),
            "NULL::text".to_string(),
            "(m.school_id IS NOT NULL)",
            " LEFT JOIN measurements m ON m.school_id = s.id",
        )
    } else {
        (
            String::new(),
            "NULL::double precision".to_string(),
            format!("({})::text", ctx.value_sql("s")),
            "FALSE",
            "",
        )
    };

    let status = classification_sql(ctx, &mut sink);
    let ids = sink.bind(SqlValue::IntArray(ctx.school_ids.clone()));

    let sql = format!(
        "{ctes}\
         SELECT s.id AS id, s.name AS name, s.country_id AS country_id, \
         s.admin1_id AS admin1_id, s.connectivity_status AS connectivity_status, \
         {rt_flag} AS is_rt_connected, \
         {measured} AS measured_value, {attribute} AS attribute_value, \
         {status} AS field_status, \
         w.connectivity_speed AS week_connectivity_speed, \
         w.connectivity AS week_connectivity \
         FROM schools s{join} \
         LEFT JOIN school_weekly_status w ON w.id = s.last_weekly_status_id \
         WHERE s.id = ANY({ids}) \
         ORDER BY s.id",
    );

    sink.finish(sql)
}

/// Yearly measurement aggregate feeding both time-player shapes.
fn yearly_cte(ctx: &QueryContext, start_year: i32, sink: &mut ParamSink) -> String {
    let year = sink.bind(SqlValue::Int(start_year as i64));
    let sources = sink.bind(SqlValue::TextArray(ctx.live_source_types.clone()));
    format!(
        "SELECT sws.school_id AS school_id, sws.year AS year, AVG({val})::double precision AS avg_value \
         FROM school_weekly_status sws \
         WHERE sws.year >= {year} \
         AND sws.live_data_source = ANY({sources}) \
         GROUP BY sws.school_id, sws.year",
        val = ctx.value_sql("sws"),
    )
}

/// Classification CASE over the yearly average.
fn yearly_classification_sql(ctx: &QueryContext, sink: &mut ParamSink) -> String {
    match &ctx.kind {
        LayerSql::Live { benchmark, base_benchmark, is_reverse } => {
            case::live_case("y.avg_value", *benchmark, *base_benchmark, *is_reverse, sink)
        }
        LayerSql::Static { legend } => case::static_case(&ctx.value_sql("s"), legend, sink),
    }
}

/// MVT tile with one feature per (school, year), for the historical
/// year-by-year player.
pub fn time_player_tile_query(
    ctx: &QueryContext,
    tile: &TileRequest,
    start_year: i32,
) -> SqlQuery {
    let mut sink = ParamSink::new();
    let bounds = envelope_geom_sql(&tile.envelope(), &mut sink);
    let yearly = yearly_cte(ctx, start_year, &mut sink);
    let status = yearly_classification_sql(ctx, &mut sink);
    let filters = school_filters(ctx, &mut sink);

    let sql = format!(
        "WITH tile_bounds AS (SELECT {bounds} AS geom), \
         yearly AS ({yearly}), \
         features AS (\
         SELECT s.id AS id, y.year AS year, {status} AS field_status, \
         (y.avg_value IS NOT NULL) AS is_rt_connected, \
         ST_AsMVTGeom(ST_Transform(s.geopoint, 3857), b.geom) AS geom \
         FROM schools s \
         JOIN yearly y ON y.school_id = s.id \
         CROSS JOIN tile_bounds b \
         WHERE ST_Intersects(ST_Transform(s.geopoint, 3857), b.geom){filters}\
         ) \
         SELECT ST_AsMVT(f, '{MVT_LAYER_NAME}', {MVT_EXTENT}, 'geom') AS tile FROM features f",
    );

    sink.finish(sql)
}

/// JSON variant of the time player: one row per (school, year).
pub fn time_player_rows_query(ctx: &QueryContext, start_year: i32) -> SqlQuery {
    let mut sink = ParamSink::new();
    let yearly = yearly_cte(ctx, start_year, &mut sink);
    let status = yearly_classification_sql(ctx, &mut sink);
    let filters = school_filters(ctx, &mut sink);

    let sql = format!(
        "WITH yearly AS ({yearly}) \
         SELECT s.id AS id, y.year AS year, {status} AS field_status, \
         (y.avg_value IS NOT NULL) AS is_rt_connected \
         FROM schools s \
         JOIN yearly y ON y.school_id = s.id \
         WHERE TRUE{filters} \
         ORDER BY s.id, y.year",
    );

    sink.finish(sql)
}
