//! Immutable per-request query parameters.
//!
//! Construction is the only place request input meets layer configuration:
//! the measured column is checked against the whitelist, ids are already
//! integers, benchmarks are converted into the display unit, and the live
//! source sentinel is appended. Builders receive the finished context by
//! reference and never mutate it.

use chrono::NaiveDate;
use maps_common::{
    layer::validate_identifier, units, DataLayer, DataSource, DateWindow, LayerType, LegendBucket,
    MapsError, MapsResult, Unit, UNKNOWN_SOURCE,
};

/// Default and maximum per-tile feature caps.
pub const DEFAULT_TILE_ROW_LIMIT: i64 = 2500;
pub const MAX_TILE_ROW_LIMIT: i64 = 10_000;

/// Unfiltered tiles at or below this zoom are randomly sampled.
pub const RANDOM_ORDER_MAX_ZOOM: u32 = 2;

/// Classification inputs, resolved per layer type.
#[derive(Debug, Clone)]
pub enum LayerSql {
    /// Benchmark pair already converted into the display unit.
    Live { benchmark: f64, base_benchmark: f64, is_reverse: bool },
    Static { legend: Vec<LegendBucket> },
}

/// Request-side inputs to context construction.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub country_ids: Vec<i64>,
    pub admin1_ids: Vec<i64>,
    pub school_ids: Vec<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_weekly: bool,
    /// Benchmark override in the source unit (country-specific benchmarks).
    pub benchmark_override: Option<f64>,
    pub row_limit: Option<i64>,
    pub zoom: Option<u32>,
    /// Pre-validated WHERE fragments from the advanced-filter provider.
    pub advanced_filters: Vec<String>,
    pub today: NaiveDate,
}

impl ContextParams {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            country_ids: Vec::new(),
            admin1_ids: Vec::new(),
            school_ids: Vec::new(),
            start_date: None,
            end_date: None,
            is_weekly: false,
            benchmark_override: None,
            row_limit: None,
            zoom: None,
            advanced_filters: Vec::new(),
            today,
        }
    }
}

/// Everything the SQL builders need for one request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub kind: LayerSql,
    /// Whitelisted measured column name.
    pub column: String,
    /// (source, display) unit pair; `None` when no conversion applies.
    pub conversion: Option<(Unit, Unit)>,
    pub display_unit: Option<Unit>,
    pub live_source_types: Vec<String>,
    pub country_ids: Vec<i64>,
    pub admin1_ids: Vec<i64>,
    pub school_ids: Vec<i64>,
    pub window: DateWindow,
    pub is_weekly: bool,
    pub advanced_filters: Vec<String>,
    pub row_limit: i64,
    /// Random sampling for unfiltered low-zoom tiles.
    pub randomize: bool,
}

impl QueryContext {
    pub fn build(
        layer: &DataLayer,
        source: &DataSource,
        params: ContextParams,
    ) -> MapsResult<Self> {
        let column = source.column(&layer.data_source_column).ok_or_else(|| {
            MapsError::ConfigError(format!(
                "column '{}' is not configured on data source '{}'",
                layer.data_source_column, source.name
            ))
        })?;
        validate_identifier(&column.name)?;

        let (kind, display_unit, conversion) = match layer.layer_type {
            LayerType::Live => {
                let global = layer.global_benchmark.as_ref().ok_or_else(|| {
                    MapsError::ConfigError("live layer without global_benchmark".into())
                })?;
                let base = column.base_benchmark.ok_or_else(|| {
                    MapsError::ConfigError(format!(
                        "column '{}' has no base_benchmark",
                        column.name
                    ))
                })?;

                // One (source, display) pair drives the benchmark pair, the
                // row expression, and the displayed numbers alike.
                let src = column.unit.unwrap_or(global.unit);
                let display = global.convert_unit.or(column.display_unit).unwrap_or(src);

                let value = params.benchmark_override.unwrap_or(global.value);
                (
                    LayerSql::Live {
                        benchmark: units::convert(src, display, value),
                        base_benchmark: units::convert(src, display, base),
                        is_reverse: layer.is_reverse,
                    },
                    Some(display),
                    (src != display).then_some((src, display)),
                )
            }
            LayerType::Static => {
                (LayerSql::Static { legend: layer.legend_configs.clone() }, None, None)
            }
        };

        let mut live_source_types = layer.live_source_types.clone();
        if !live_source_types.iter().any(|s| s == UNKNOWN_SOURCE) {
            live_source_types.push(UNKNOWN_SOURCE.to_string());
        }

        let has_filter = !params.country_ids.is_empty()
            || !params.admin1_ids.is_empty()
            || !params.school_ids.is_empty();
        let randomize =
            !has_filter && params.zoom.map_or(false, |z| z <= RANDOM_ORDER_MAX_ZOOM);

        let row_limit = params
            .row_limit
            .unwrap_or(DEFAULT_TILE_ROW_LIMIT)
            .clamp(1, MAX_TILE_ROW_LIMIT);

        Ok(Self {
            kind,
            column: column.name.clone(),
            conversion,
            display_unit,
            live_source_types,
            country_ids: params.country_ids,
            admin1_ids: params.admin1_ids,
            school_ids: params.school_ids,
            window: DateWindow::resolve(params.start_date, params.end_date, params.today),
            is_weekly: params.is_weekly,
            advanced_filters: params.advanced_filters,
            row_limit,
            randomize,
        })
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, LayerSql::Live { .. })
    }

    pub fn has_narrowing_filter(&self) -> bool {
        !self.country_ids.is_empty()
            || !self.admin1_ids.is_empty()
            || !self.school_ids.is_empty()
    }

    /// The measured column with unit conversion applied, qualified by a
    /// table alias.
    pub fn value_sql(&self, alias: &str) -> String {
        let qualified = format!("{}.{}", alias, self.column);
        match self.conversion {
            Some((src, display)) => units::sql_expr(src, display, &qualified),
            None => qualified,
        }
    }

    /// In-process classification matching the emitted SQL, for rollups
    /// computed after the query.
    pub fn classify(&self, value: Option<f64>) -> maps_common::Bucket {
        match &self.kind {
            LayerSql::Live { benchmark, base_benchmark, is_reverse } => {
                maps_common::classify(value, *benchmark, *base_benchmark, *is_reverse)
            }
            LayerSql::Static { .. } => maps_common::Bucket::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maps_common::{ColumnConfig, GlobalBenchmark, LayerStatus};
    use maps_common::layer::ColumnKind;

    fn fixture() -> (DataLayer, DataSource) {
        let source = DataSource {
            id: 1,
            name: "daily-check-app".into(),
            version: 1,
            status: LayerStatus::Published,
            column_config: vec![ColumnConfig {
                name: "connectivity_speed".into(),
                kind: ColumnKind::Float,
                unit: Some(Unit::Bps),
                display_unit: None,
                base_benchmark: Some(1_000_000.0),
                is_parameter: true,
                supported_functions: vec!["AVG".into()],
            }],
        };
        let layer = DataLayer {
            id: 10,
            code: "download-speed".into(),
            name: "Download speed".into(),
            layer_type: LayerType::Live,
            category: "connectivity".into(),
            status: LayerStatus::Published,
            is_reverse: false,
            global_benchmark: Some(GlobalBenchmark {
                value: 20_000_000.0,
                unit: Unit::Bps,
                convert_unit: Some(Unit::Mbps),
            }),
            legend_configs: vec![],
            data_source_id: 1,
            data_source_column: "connectivity_speed".into(),
            live_source_types: vec!["DAILY_CHECK_APP".into()],
        };
        (layer, source)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
    }

    #[test]
    fn test_benchmarks_converted_to_display_unit() {
        let (layer, source) = fixture();
        let ctx = QueryContext::build(&layer, &source, ContextParams::new(today())).unwrap();

        match ctx.kind {
            LayerSql::Live { benchmark, base_benchmark, is_reverse } => {
                assert_eq!(benchmark, 20.0);
                assert_eq!(base_benchmark, 1.0);
                assert!(!is_reverse);
            }
            _ => panic!("expected live layer"),
        }
        assert_eq!(ctx.display_unit, Some(Unit::Mbps));
        assert_eq!(
            ctx.value_sql("sds"),
            "sds.connectivity_speed / (1000.0 * 1000.0)"
        );
    }

    #[test]
    fn test_benchmark_override_is_in_source_unit() {
        let (layer, source) = fixture();
        let mut params = ContextParams::new(today());
        params.benchmark_override = Some(10_000_000.0);

        let ctx = QueryContext::build(&layer, &source, params).unwrap();
        match ctx.kind {
            LayerSql::Live { benchmark, .. } => assert_eq!(benchmark, 10.0),
            _ => panic!("expected live layer"),
        }
    }

    #[test]
    fn test_unknown_sentinel_always_present() {
        let (layer, source) = fixture();
        let ctx = QueryContext::build(&layer, &source, ContextParams::new(today())).unwrap();
        assert!(ctx.live_source_types.iter().any(|s| s == UNKNOWN_SOURCE));

        // Not duplicated when already configured
        let mut layer2 = layer;
        layer2.live_source_types.push(UNKNOWN_SOURCE.into());
        let ctx = QueryContext::build(&layer2, &source, ContextParams::new(today())).unwrap();
        let count = ctx.live_source_types.iter().filter(|s| *s == UNKNOWN_SOURCE).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_random_order_only_for_unfiltered_low_zoom() {
        let (layer, source) = fixture();

        let mut params = ContextParams::new(today());
        params.zoom = Some(2);
        let ctx = QueryContext::build(&layer, &source, params.clone()).unwrap();
        assert!(ctx.randomize);

        params.zoom = Some(3);
        let ctx = QueryContext::build(&layer, &source, params.clone()).unwrap();
        assert!(!ctx.randomize);

        params.zoom = Some(1);
        params.country_ids = vec![144];
        let ctx = QueryContext::build(&layer, &source, params).unwrap();
        assert!(!ctx.randomize);
    }

    #[test]
    fn test_row_limit_clamped() {
        let (layer, source) = fixture();

        let mut params = ContextParams::new(today());
        params.row_limit = Some(1_000_000);
        let ctx = QueryContext::build(&layer, &source, params.clone()).unwrap();
        assert_eq!(ctx.row_limit, MAX_TILE_ROW_LIMIT);

        params.row_limit = None;
        let ctx = QueryContext::build(&layer, &source, params).unwrap();
        assert_eq!(ctx.row_limit, DEFAULT_TILE_ROW_LIMIT);
    }

    #[test]
    fn test_unconfigured_column_rejected() {
        let (mut layer, source) = fixture();
        layer.data_source_column = "latency".into();
        assert!(QueryContext::build(&layer, &source, ContextParams::new(today())).is_err());
    }
}
