//! Data layer and data source configuration model.
//!
//! These types mirror the JSON configuration authored by layer editors
//! (`column_config`, `legend_configs`, `global_benchmark`). The shapes are
//! a wire contract: changing them is a breaking change for the tile and
//! info endpoints. Configuration is validated once at publish time; the
//! query builders consume it as-is.

use crate::{units, MapsError, MapsResult, Unit};
use serde::{Deserialize, Serialize};

/// Sentinel feed identifier appended to every live-source list so the
/// membership clause never matches against an empty set.
pub const UNKNOWN_SOURCE: &str = "UNKNOWN";

/// Kind of overlay a data layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerType {
    /// Benchmark-relative classification of a live measurement feed.
    Live,
    /// Legend-relative classification of a slow-changing attribute.
    Static,
}

/// Lifecycle status shared by data layers and data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerStatus {
    Draft,
    ReadyToPublish,
    Published,
    Disabled,
}

impl LayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerStatus::Draft => "DRAFT",
            LayerStatus::ReadyToPublish => "READY_TO_PUBLISH",
            LayerStatus::Published => "PUBLISHED",
            LayerStatus::Disabled => "DISABLED",
        }
    }
}

impl std::str::FromStr for LayerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(LayerStatus::Draft),
            "READY_TO_PUBLISH" => Ok(LayerStatus::ReadyToPublish),
            "PUBLISHED" => Ok(LayerStatus::Published),
            "DISABLED" => Ok(LayerStatus::Disabled),
            _ => Err(()),
        }
    }
}

/// Numeric benchmark configured on a live layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalBenchmark {
    /// Threshold in the source unit.
    pub value: f64,
    pub unit: Unit,
    /// Display unit; comparisons and displayed values are converted into it.
    #[serde(default)]
    pub convert_unit: Option<Unit>,
}

/// Scalar type of a configured column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Int,
    Float,
    Str,
}

/// One column descriptor from a data source's `column_config`.
///
/// The set of descriptors is the whitelist of identifiers the SQL builder
/// may interpolate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(default)]
    pub unit: Option<Unit>,
    #[serde(default)]
    pub display_unit: Option<Unit>,
    #[serde(default)]
    pub base_benchmark: Option<f64>,
    #[serde(default)]
    pub is_parameter: bool,
    #[serde(default)]
    pub supported_functions: Vec<String>,
}

/// How a static legend bucket matches measured values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendRule {
    /// Literal membership; string comparison is case-folded.
    Values { values: Vec<serde_json::Value> },
    /// Raw SQL predicate with a `{col}` placeholder for the measured column.
    Sql { template: String },
}

/// One display bucket of a static layer's legend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegendBucket {
    pub label: String,
    /// `None` marks the fallback bucket (the `ELSE` arm).
    #[serde(default)]
    pub rule: Option<LegendRule>,
}

/// A named, versioned description of a tabular data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    pub version: i32,
    pub status: LayerStatus,
    pub column_config: Vec<ColumnConfig>,
}

impl DataSource {
    /// Whitelist lookup for a measured column.
    pub fn column(&self, name: &str) -> Option<&ColumnConfig> {
        self.column_config.iter().find(|c| c.name == name)
    }
}

/// A user-facing map overlay definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLayer {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub category: String,
    pub status: LayerStatus,
    /// Flips the good/bad direction of the benchmark comparison.
    #[serde(default)]
    pub is_reverse: bool,
    #[serde(default)]
    pub global_benchmark: Option<GlobalBenchmark>,
    #[serde(default)]
    pub legend_configs: Vec<LegendBucket>,
    pub data_source_id: i64,
    /// Which column of the data source this layer visualizes.
    pub data_source_column: String,
    /// Upstream feeds contributing rows to this layer's time series.
    #[serde(default)]
    pub live_source_types: Vec<String>,
}

impl DataLayer {
    pub fn is_published(&self) -> bool {
        self.status == LayerStatus::Published
    }

    /// Fail-fast configuration check run at publish time.
    ///
    /// Anything this rejects would otherwise surface as a query execution
    /// failure on the tile path, so the whole shape is checked here and the
    /// builders trust the configuration afterwards.
    pub fn validate_for_publish(&self, source: &DataSource) -> MapsResult<()> {
        if source.status != LayerStatus::Published {
            return Err(MapsError::ConfigError(format!(
                "data source '{}' is not published",
                source.name
            )));
        }

        let column = source.column(&self.data_source_column).ok_or_else(|| {
            MapsError::ConfigError(format!(
                "column '{}' is not in the column_config of data source '{}'",
                self.data_source_column, source.name
            ))
        })?;
        validate_identifier(&column.name)?;

        match self.layer_type {
            LayerType::Live => self.validate_live(column),
            LayerType::Static => self.validate_legend(),
        }
    }

    fn validate_live(&self, column: &ColumnConfig) -> MapsResult<()> {
        let benchmark = self
            .global_benchmark
            .as_ref()
            .ok_or_else(|| MapsError::ConfigError("live layer without global_benchmark".into()))?;

        if !benchmark.value.is_finite() {
            return Err(MapsError::ConfigError("global_benchmark.value is not finite".into()));
        }

        let base = column.base_benchmark.ok_or_else(|| {
            MapsError::ConfigError(format!(
                "column '{}' has no base_benchmark",
                column.name
            ))
        })?;
        if !base.is_finite() {
            return Err(MapsError::ConfigError(format!(
                "column '{}' base_benchmark is not finite",
                column.name
            )));
        }

        // The (source, display) pair must have a conversion template or be
        // an identity pair.
        let source_unit = column.unit.unwrap_or(Unit::Bps);
        let display = benchmark
            .convert_unit
            .or(column.display_unit)
            .unwrap_or(source_unit);
        if source_unit != display && units::sql_template(source_unit, display).is_none() {
            return Err(MapsError::ConfigError(format!(
                "no conversion from {} to {}",
                source_unit, display
            )));
        }

        Ok(())
    }

    fn validate_legend(&self) -> MapsResult<()> {
        if self.legend_configs.is_empty() {
            return Err(MapsError::ConfigError("static layer without legend_configs".into()));
        }

        let mut fallbacks = 0usize;
        let mut labels: Vec<&str> = Vec::new();

        for bucket in &self.legend_configs {
            if bucket.label.trim().is_empty() {
                return Err(MapsError::ConfigError("legend bucket with empty label".into()));
            }
            if labels.contains(&bucket.label.as_str()) {
                return Err(MapsError::ConfigError(format!(
                    "duplicate legend label '{}'",
                    bucket.label
                )));
            }
            labels.push(&bucket.label);

            match &bucket.rule {
                None => fallbacks += 1,
                Some(LegendRule::Values { values }) => {
                    if values.is_empty() {
                        return Err(MapsError::ConfigError(format!(
                            "legend bucket '{}' has an empty value list",
                            bucket.label
                        )));
                    }
                }
                Some(LegendRule::Sql { template }) => {
                    if !template.contains("{col}") {
                        return Err(MapsError::ConfigError(format!(
                            "legend bucket '{}' SQL rule is missing the {{col}} placeholder",
                            bucket.label
                        )));
                    }
                    if template.contains(';') {
                        return Err(MapsError::ConfigError(format!(
                            "legend bucket '{}' SQL rule must be a single predicate",
                            bucket.label
                        )));
                    }
                }
            }
        }

        if fallbacks > 1 {
            return Err(MapsError::ConfigError("legend has more than one fallback bucket".into()));
        }

        Ok(())
    }
}

/// Reject anything that is not a plain lowercase SQL identifier.
pub fn validate_identifier(name: &str) -> MapsResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MapsError::ConfigError(format!("invalid column identifier '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn speed_source() -> DataSource {
        DataSource {
            id: 1,
            name: "daily-check-app".into(),
            version: 1,
            status: LayerStatus::Published,
            column_config: vec![ColumnConfig {
                name: "connectivity_speed".into(),
                kind: ColumnKind::Float,
                unit: Some(Unit::Bps),
                display_unit: Some(Unit::Mbps),
                base_benchmark: Some(1_000_000.0),
                is_parameter: true,
                supported_functions: vec!["AVG".into()],
            }],
        }
    }

    fn live_layer() -> DataLayer {
        DataLayer {
            id: 10,
            code: "download-speed".into(),
            name: "Download speed".into(),
            layer_type: LayerType::Live,
            category: "connectivity".into(),
            status: LayerStatus::ReadyToPublish,
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
        }
    }

    #[test]
    fn test_live_layer_validates() {
        assert!(live_layer().validate_for_publish(&speed_source()).is_ok());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let mut layer = live_layer();
        layer.data_source_column = "latency".into();
        assert!(layer.validate_for_publish(&speed_source()).is_err());
    }

    #[test]
    fn test_missing_benchmark_rejected() {
        let mut layer = live_layer();
        layer.global_benchmark = None;
        assert!(layer.validate_for_publish(&speed_source()).is_err());
    }

    #[test]
    fn test_static_legend_validation() {
        let mut source = speed_source();
        source.column_config[0] = ColumnConfig {
            name: "coverage_type".into(),
            kind: ColumnKind::Str,
            unit: None,
            display_unit: None,
            base_benchmark: None,
            is_parameter: false,
            supported_functions: vec![],
        };

        let mut layer = live_layer();
        layer.layer_type = LayerType::Static;
        layer.global_benchmark = None;
        layer.data_source_column = "coverage_type".into();
        layer.legend_configs = vec![
            LegendBucket {
                label: "5G/4G".into(),
                rule: Some(LegendRule::Values { values: vec![json!("5g"), json!("4g")] }),
            },
            LegendBucket {
                label: "No coverage".into(),
                rule: Some(LegendRule::Sql { template: "{col} IS NULL OR {col} = 'no'".into() }),
            },
            LegendBucket { label: "Unknown".into(), rule: None },
        ];
        assert!(layer.validate_for_publish(&source).is_ok());

        // Two fallback buckets are ambiguous
        layer.legend_configs.push(LegendBucket { label: "Other".into(), rule: None });
        assert!(layer.validate_for_publish(&source).is_err());

        // SQL rule without the placeholder never matches the column
        layer.legend_configs.truncate(3);
        layer.legend_configs[1].rule =
            Some(LegendRule::Sql { template: "coverage_type = 'no'".into() });
        assert!(layer.validate_for_publish(&source).is_err());
    }

    #[test]
    fn test_identifier_whitelist() {
        assert!(validate_identifier("connectivity_speed").is_ok());
        assert!(validate_identifier("speed2").is_ok());
        assert!(validate_identifier("Speed").is_err());
        assert!(validate_identifier("speed; DROP TABLE schools").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_legend_rule_json_shape() {
        let bucket: LegendBucket = serde_json::from_value(json!({
            "label": "Good",
            "rule": {"values": {"values": ["fiber"]}}
        }))
        .unwrap();
        assert!(matches!(bucket.rule, Some(LegendRule::Values { .. })));

        let fallback: LegendBucket = serde_json::from_value(json!({"label": "Unknown"})).unwrap();
        assert!(fallback.rule.is_none());
    }
}
