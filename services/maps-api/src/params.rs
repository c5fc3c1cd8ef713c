//! Query-parameter plumbing shared by the public endpoints.

use chrono::NaiveDate;
use maps_common::{MapsError, MapsResult};

/// Parse a comma-separated id list; absent means no filter.
pub fn parse_id_list(param: &str, value: &Option<String>) -> MapsResult<Vec<i64>> {
    let Some(raw) = value else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| MapsError::InvalidParameter {
                param: param.to_string(),
                message: format!("'{}' is not an integer", part),
            })
        })
        .collect()
}

/// Parse a `YYYY-MM-DD` date parameter.
pub fn parse_date(param: &str, value: &Option<String>) -> MapsResult<Option<NaiveDate>> {
    value
        .as_deref()
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| MapsError::InvalidParameter {
                param: param.to_string(),
                message: format!("'{}' is not a YYYY-MM-DD date", raw),
            })
        })
        .transpose()
}

pub fn parse_flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("true") | Some("1"))
}

/// `cache=false` forces synchronous recomputation and repopulation.
pub fn cache_bypassed(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("false") | Some("0"))
}

/// Canonical logical key: path plus sorted query parameters.
///
/// The cache-control parameter is always excluded so `cache=false` calls
/// share the entry they repopulate. The result doubles as the refresh
/// request path.
pub fn logical_request_path(path: &str, params: &[(&str, Option<String>)]) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .filter(|(name, _)| *name != "cache")
        .filter_map(|(name, value)| value.as_deref().map(|v| (*name, v)))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        return path.to_string();
    }

    let query: Vec<String> = pairs.iter().map(|(name, v)| format!("{}={}", name, v)).collect();
    format!("{}?{}", path, query.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("school_ids", &None).unwrap(), Vec::<i64>::new());
        assert_eq!(
            parse_id_list("school_ids", &Some("1, 2,3".into())).unwrap(),
            vec![1, 2, 3]
        );
        assert!(parse_id_list("school_ids", &Some("1,x".into())).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("start_date", &Some("2024-05-06".into())).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 6)
        );
        assert!(parse_date("start_date", &Some("06/05/2024".into())).is_err());
        assert_eq!(parse_date("start_date", &None).unwrap(), None);
    }

    #[test]
    fn test_cache_bypass_convention() {
        assert!(cache_bypassed(&Some("false".into())));
        assert!(cache_bypassed(&Some("0".into())));
        assert!(!cache_bypassed(&Some("true".into())));
        assert!(!cache_bypassed(&None));
    }

    #[test]
    fn test_logical_path_sorts_and_drops_cache_param() {
        let path = logical_request_path(
            "/api/accounts/layers/7/map/",
            &[
                ("z", Some("3".into())),
                ("x", Some("4".into())),
                ("y", Some("2".into())),
                ("cache", Some("false".into())),
                ("country_id", None),
            ],
        );
        assert_eq!(path, "/api/accounts/layers/7/map/?x=4&y=2&z=3");

        // Identical with or without the cache parameter
        let without = logical_request_path(
            "/api/accounts/layers/7/map/",
            &[("z", Some("3".into())), ("x", Some("4".into())), ("y", Some("2".into()))],
        );
        assert_eq!(path, without);
    }

    #[test]
    fn test_logical_path_without_params() {
        let path = logical_request_path("/api/accounts/layers/7/info/", &[("cache", None)]);
        assert_eq!(path, "/api/accounts/layers/7/info/");
    }
}
