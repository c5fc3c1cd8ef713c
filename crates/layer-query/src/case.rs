//! Classification CASE expression builders.
//!
//! The emitted SQL must agree bit-for-bit with the in-process
//! [`maps_common::classify`] on boundary values; both sides are exercised by
//! the same fixtures in the builder tests.

use crate::sql::{ParamSink, SqlValue};
use maps_common::{LegendBucket, LegendRule};

/// Benchmark-relative bucket CASE for live layers.
///
/// Forward mode: strictly above the benchmark is good, between base and
/// benchmark (inclusive) is moderate, below base is bad. Reverse mode
/// mirrors every comparison.
pub fn live_case(
    value_expr: &str,
    benchmark: f64,
    base_benchmark: f64,
    is_reverse: bool,
    sink: &mut ParamSink,
) -> String {
    let b = sink.bind(SqlValue::Float(benchmark));
    let base = sink.bind(SqlValue::Float(base_benchmark));
    let v = value_expr;

    if is_reverse {
        format!(
            "CASE WHEN {v} < {b} THEN 'good' \
             WHEN {v} >= {b} AND {v} <= {base} THEN 'moderate' \
             WHEN {v} > {base} THEN 'bad' \
             ELSE 'unknown' END"
        )
    } else {
        format!(
            "CASE WHEN {v} > {b} THEN 'good' \
             WHEN {v} <= {b} AND {v} >= {base} THEN 'moderate' \
             WHEN {v} < {base} THEN 'bad' \
             ELSE 'unknown' END"
        )
    }
}

/// Legend-relative bucket CASE for static layers.
///
/// Value rules become case-folded membership tests, SQL rules interpolate
/// the whitelisted column expression, and the fallback bucket (validated at
/// publish time to be unique) becomes the ELSE arm. Without a fallback the
/// ELSE arm is `'unknown'`.
pub fn static_case(column_expr: &str, legend: &[LegendBucket], sink: &mut ParamSink) -> String {
    let mut arms = String::from("CASE");
    let mut fallback: Option<String> = None;

    for bucket in legend {
        match &bucket.rule {
            None => {
                fallback = Some(sink.bind(SqlValue::Text(bucket.label.clone())));
            }
            Some(LegendRule::Values { values }) => {
                let list: Vec<String> = values
                    .iter()
                    .map(|v| sink.bind(SqlValue::Text(scalar_text(v).to_lowercase())))
                    .collect();
                let label = sink.bind(SqlValue::Text(bucket.label.clone()));
                arms.push_str(&format!(
                    " WHEN LOWER({}::text) IN ({}) THEN {}",
                    column_expr,
                    list.join(", "),
                    label
                ));
            }
            Some(LegendRule::Sql { template }) => {
                let predicate = template.replace("{col}", column_expr);
                let label = sink.bind(SqlValue::Text(bucket.label.clone()));
                arms.push_str(&format!(" WHEN {} THEN {}", predicate, label));
            }
        }
    }

    match fallback {
        Some(label) => arms.push_str(&format!(" ELSE {} END", label)),
        None => arms.push_str(" ELSE 'unknown' END"),
    }

    arms
}

/// Text form of a legend scalar: strings unquoted, everything else as JSON.
fn scalar_text(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_case_forward() {
        let mut sink = ParamSink::new();
        let case = live_case("avg_value", 20.0, 1.0, false, &mut sink);

        assert_eq!(
            case,
            "CASE WHEN avg_value > $1 THEN 'good' \
             WHEN avg_value <= $1 AND avg_value >= $2 THEN 'moderate' \
             WHEN avg_value < $2 THEN 'bad' \
             ELSE 'unknown' END"
        );
        let query = sink.finish(case);
        assert_eq!(query.params, vec![SqlValue::Float(20.0), SqlValue::Float(1.0)]);
    }

    #[test]
    fn test_live_case_reverse_mirrors_comparisons() {
        let mut sink = ParamSink::new();
        let case = live_case("avg_value", 50.0, 200.0, true, &mut sink);

        assert!(case.contains("avg_value < $1 THEN 'good'"));
        assert!(case.contains("avg_value > $2 THEN 'bad'"));
        assert!(case.contains(">= $1 AND avg_value <= $2 THEN 'moderate'"));
    }

    #[test]
    fn test_static_case_value_and_sql_rules() {
        let legend = vec![
            LegendBucket {
                label: "Fiber".into(),
                rule: Some(LegendRule::Values { values: vec![json!("Fiber"), json!("FTTH")] }),
            },
            LegendBucket {
                label: "None".into(),
                rule: Some(LegendRule::Sql { template: "{col} IS NULL".into() }),
            },
            LegendBucket { label: "Other".into(), rule: None },
        ];

        let mut sink = ParamSink::new();
        let case = static_case("s.connectivity_type", &legend, &mut sink);

        // Membership is case-folded on both sides
        assert!(case.contains("LOWER(s.connectivity_type::text) IN ($1, $2) THEN $3"));
        assert!(case.contains("WHEN s.connectivity_type IS NULL THEN $4"));
        assert!(case.ends_with("ELSE $5 END"));

        let query = sink.finish(case);
        assert_eq!(query.params[0], SqlValue::Text("fiber".into()));
        assert_eq!(query.params[1], SqlValue::Text("ftth".into()));
        assert_eq!(query.params[2], SqlValue::Text("Fiber".into()));
        assert_eq!(query.params[4], SqlValue::Text("Other".into()));
    }

    #[test]
    fn test_static_case_without_fallback_defaults_to_unknown() {
        let legend = vec![LegendBucket {
            label: "Yes".into(),
            rule: Some(LegendRule::Values { values: vec![json!(true)] }),
        }];

        let mut sink = ParamSink::new();
        let case = static_case("s.has_power", &legend, &mut sink);
        assert!(case.ends_with("ELSE 'unknown' END"));

        // Non-string scalars serialize via JSON text
        let query = sink.finish(case);
        assert_eq!(query.params[0], SqlValue::Text("true".into()));
    }
}
