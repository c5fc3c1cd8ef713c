//! Benchmark classification of measurements into display buckets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification bucket for a measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Good,
    Moderate,
    Bad,
    Unknown,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Good => "good",
            Bucket::Moderate => "moderate",
            Bucket::Bad => "bad",
            Bucket::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Bucket {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "good" => Ok(Bucket::Good),
            "moderate" => Ok(Bucket::Moderate),
            "bad" => Ok(Bucket::Bad),
            "unknown" => Ok(Bucket::Unknown),
            _ => Err(()),
        }
    }
}

/// Classify a measurement against a benchmark and base benchmark.
///
/// This is the in-process twin of the SQL CASE emitted by the query builder
/// and must agree with it on every boundary: in forward mode a value equal
/// to the benchmark is `Moderate` (good requires strictly greater), a value
/// equal to the base benchmark is `Moderate`. Reverse mode mirrors the
/// comparison directions. A missing value is always `Unknown`.
pub fn classify(
    value: Option<f64>,
    benchmark: f64,
    base_benchmark: f64,
    is_reverse: bool,
) -> Bucket {
    let v = match value {
        Some(v) if !v.is_nan() => v,
        _ => return Bucket::Unknown,
    };

    if is_reverse {
        if v < benchmark {
            Bucket::Good
        } else if v >= benchmark && v <= base_benchmark {
            Bucket::Moderate
        } else if v > base_benchmark {
            Bucket::Bad
        } else {
            Bucket::Unknown
        }
    } else if v > benchmark {
        Bucket::Good
    } else if v <= benchmark && v >= base_benchmark {
        Bucket::Moderate
    } else if v < base_benchmark {
        Bucket::Bad
    } else {
        Bucket::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_buckets() {
        // base 1.0, benchmark 20.0
        assert_eq!(classify(Some(25.0), 20.0, 1.0, false), Bucket::Good);
        assert_eq!(classify(Some(15.0), 20.0, 1.0, false), Bucket::Moderate);
        assert_eq!(classify(Some(0.5), 20.0, 1.0, false), Bucket::Bad);
        assert_eq!(classify(None, 20.0, 1.0, false), Bucket::Unknown);
    }

    #[test]
    fn test_forward_boundaries() {
        // Equality with the benchmark is moderate: good requires strictly greater
        assert_eq!(classify(Some(20.0), 20.0, 1.0, false), Bucket::Moderate);
        assert_eq!(classify(Some(1.0), 20.0, 1.0, false), Bucket::Moderate);
        assert_eq!(
            classify(Some(20.0 + f64::EPSILON * 32.0), 20.0, 1.0, false),
            Bucket::Good
        );
    }

    #[test]
    fn test_monotonicity() {
        // base < v1 < benchmark < v2
        let (base, benchmark) = (2.0, 10.0);
        for v1 in [2.5, 5.0, 9.9] {
            assert_eq!(classify(Some(v1), benchmark, base, false), Bucket::Moderate);
        }
        for v2 in [10.1, 50.0, 1e9] {
            assert_eq!(classify(Some(v2), benchmark, base, false), Bucket::Good);
        }
    }

    #[test]
    fn test_reverse_symmetry() {
        // Latency-style layer: lower is better. base 200, benchmark 50.
        assert_eq!(classify(Some(20.0), 50.0, 200.0, true), Bucket::Good);
        assert_eq!(classify(Some(100.0), 50.0, 200.0, true), Bucket::Moderate);
        assert_eq!(classify(Some(300.0), 50.0, 200.0, true), Bucket::Bad);
        assert_eq!(classify(None, 50.0, 200.0, true), Bucket::Unknown);

        // Boundaries mirror forward mode: equality with the benchmark is moderate
        assert_eq!(classify(Some(50.0), 50.0, 200.0, true), Bucket::Moderate);
        assert_eq!(classify(Some(200.0), 50.0, 200.0, true), Bucket::Moderate);
    }

    #[test]
    fn test_bucket_swap_under_reversal() {
        // Swapping is_reverse with mirrored thresholds swaps good and bad
        // and leaves moderate in place.
        let cases = [(5.0, Bucket::Bad), (15.0, Bucket::Moderate), (25.0, Bucket::Good)];
        for (v, forward) in cases {
            let reversed = classify(Some(v), 10.0, 20.0, true);
            let expected = match forward {
                Bucket::Good => Bucket::Bad,
                Bucket::Bad => Bucket::Good,
                other => other,
            };
            assert_eq!(classify(Some(v), 20.0, 10.0, false), forward);
            assert_eq!(reversed, expected);
        }
    }

    #[test]
    fn test_nan_is_unknown() {
        assert_eq!(classify(Some(f64::NAN), 20.0, 1.0, false), Bucket::Unknown);
        assert_eq!(classify(Some(f64::NAN), 20.0, 1.0, true), Bucket::Unknown);
    }
}
