//! Measurement units and the fixed conversion template table.
//!
//! Conversions are multiplicative templates shared between the SQL builder
//! and in-process code, so the benchmark, the base benchmark, and every row
//! value are compared and displayed in the same unit.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Throughput unit of a measured column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Bps,
    Kbps,
    Mbps,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Bps => "bps",
            Unit::Kbps => "kbps",
            Unit::Mbps => "mbps",
        }
    }

    /// Multiplier down to bits per second.
    fn bps_factor(&self) -> f64 {
        match self {
            Unit::Bps => 1.0,
            Unit::Kbps => 1000.0,
            Unit::Mbps => 1000.0 * 1000.0,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bps" => Ok(Unit::Bps),
            "kbps" => Ok(Unit::Kbps),
            "mbps" => Ok(Unit::Mbps),
            _ => Err(()),
        }
    }
}

/// SQL templates keyed by (source, display) unit. `{val}` is replaced with
/// the column expression.
static CONVERSION_TEMPLATES: Lazy<HashMap<(Unit, Unit), &'static str>> = Lazy::new(|| {
    HashMap::from([
        ((Unit::Bps, Unit::Kbps), "{val} / 1000.0"),
        ((Unit::Bps, Unit::Mbps), "{val} / (1000.0 * 1000.0)"),
        ((Unit::Kbps, Unit::Mbps), "{val} / 1000.0"),
        ((Unit::Kbps, Unit::Bps), "{val} * 1000.0"),
        ((Unit::Mbps, Unit::Kbps), "{val} * 1000.0"),
        ((Unit::Mbps, Unit::Bps), "{val} * (1000.0 * 1000.0)"),
    ])
});

/// Look up the SQL conversion template for a unit pair.
///
/// `None` means no conversion is needed (identity).
pub fn sql_template(from: Unit, to: Unit) -> Option<&'static str> {
    if from == to {
        return None;
    }
    CONVERSION_TEMPLATES.get(&(from, to)).copied()
}

/// Apply the conversion template to a column expression.
pub fn sql_expr(from: Unit, to: Unit, inner: &str) -> String {
    match sql_template(from, to) {
        Some(template) => template.replace("{val}", inner),
        None => inner.to_string(),
    }
}

/// In-process conversion, numerically identical to the SQL templates.
pub fn convert(from: Unit, to: Unit, value: f64) -> f64 {
    value * from.bps_factor() / to.bps_factor()
}

/// Round a display value to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_templates() {
        assert_eq!(
            sql_expr(Unit::Bps, Unit::Mbps, "sds.connectivity_speed"),
            "sds.connectivity_speed / (1000.0 * 1000.0)"
        );
        assert_eq!(sql_expr(Unit::Mbps, Unit::Kbps, "v"), "v * 1000.0");
        // Identity: no template, expression untouched
        assert_eq!(sql_expr(Unit::Kbps, Unit::Kbps, "v"), "v");
        assert!(sql_template(Unit::Bps, Unit::Bps).is_none());
    }

    #[test]
    fn test_convert_matches_templates() {
        assert_eq!(convert(Unit::Bps, Unit::Mbps, 25_000_000.0), 25.0);
        assert_eq!(convert(Unit::Bps, Unit::Kbps, 1500.0), 1.5);
        assert_eq!(convert(Unit::Mbps, Unit::Bps, 2.0), 2_000_000.0);
        assert_eq!(convert(Unit::Kbps, Unit::Mbps, 500.0), 0.5);
    }

    #[test]
    fn test_round_trip_within_rounding_tolerance() {
        for value in [0.5, 1.0, 19.99, 25_000_000.0, 123_456.78] {
            let there = convert(Unit::Bps, Unit::Mbps, value);
            let back = convert(Unit::Mbps, Unit::Bps, there);
            assert!((round2(back) - round2(value)).abs() < 0.01, "value {}", value);
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(19.994999), 19.99);
        assert_eq!(round2(19.995001), 20.0);
        assert_eq!(round2(0.5), 0.5);
    }
}
