//! HTTP request handlers for the tile, info, and time-player endpoints.
//!
//! This module is organized into submodules:
//! - `map`: per-layer MVT tile handler
//! - `info`: info-panel aggregate and per-school detail handler
//! - `time_player`: historical year-by-year tile and JSON handlers
//! - `admin`: publish transition and operator cache invalidation
//! - `monitoring`: health checks, Prometheus metrics, JSON stats

pub mod admin;
pub mod info;
pub mod map;
pub mod monitoring;
pub mod time_player;

pub use admin::{cache_invalidate_handler, publish_layer_handler};
pub use info::layer_info_handler;
pub use map::layer_map_handler;
pub use monitoring::{api_metrics_handler, health_handler, metrics_handler, ready_handler};
pub use time_player::{time_player_rows_handler, time_player_tile_handler};

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use tracing::{debug, error};

use maps_common::{MapsError, MapsResult, TileRequest};

/// JSON error response labeled with the calling handler.
///
/// Server-side failures are logged with full detail; the body only ever
/// carries the public message.
pub fn error_response(handler: &'static str, err: &MapsError) -> Response {
    let status = StatusCode::from_u16(err.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(handler, error = %err, "request failed");
    } else {
        debug!(handler, error = %err, "request rejected");
    }

    let body = serde_json::json!({ "error": err.public_message() }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// 200 JSON response with the permissive CORS header tile clients expect.
pub fn json_response(body: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .unwrap()
}

/// Binary MVT response.
pub fn tile_response(tile: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.mapbox-vector-tile")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(tile))
        .unwrap()
}

/// Assemble and validate a tile request from z/x/y query parameters.
///
/// The parameters are joined into a `Z/X/Y.FORMAT` path and parsed as one
/// unit, so every malformed shape fails the same way before any SQL is
/// built.
pub fn parse_tile_params(
    z: &Option<String>,
    x: &Option<String>,
    y: &Option<String>,
    format: &Option<String>,
) -> MapsResult<TileRequest> {
    let z = z.as_deref().ok_or_else(|| MapsError::MissingParameter("z".into()))?;
    let x = x.as_deref().ok_or_else(|| MapsError::MissingParameter("x".into()))?;
    let y = y.as_deref().ok_or_else(|| MapsError::MissingParameter("y".into()))?;
    let format = format.as_deref().unwrap_or("pbf");

    let path = format!("{}/{}/{}.{}", z, x, y, format);
    let tile =
        TileRequest::from_path(&path).ok_or_else(|| MapsError::InvalidTilePath(path.clone()))?;

    if !tile.is_valid() {
        return Err(MapsError::TileOutOfRange(path));
    }

    Ok(tile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maps_common::TileFormat;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_parse_tile_params() {
        let tile = parse_tile_params(&some("3"), &some("4"), &some("2"), &None).unwrap();
        assert_eq!(tile, TileRequest::new(3, 4, 2, TileFormat::Pbf));

        let tile = parse_tile_params(&some("3"), &some("4"), &some("2"), &some("mvt")).unwrap();
        assert_eq!(tile.format, TileFormat::Mvt);
    }

    #[test]
    fn test_parse_tile_params_failures() {
        // Missing coordinate
        assert!(matches!(
            parse_tile_params(&None, &some("4"), &some("2"), &None),
            Err(MapsError::MissingParameter(_))
        ));
        // Non-numeric
        assert!(matches!(
            parse_tile_params(&some("a"), &some("4"), &some("2"), &None),
            Err(MapsError::InvalidTilePath(_))
        ));
        // Unsupported format
        assert!(matches!(
            parse_tile_params(&some("3"), &some("4"), &some("2"), &some("png")),
            Err(MapsError::InvalidTilePath(_))
        ));
        // Out of range for the zoom level
        assert!(matches!(
            parse_tile_params(&some("3"), &some("8"), &some("0"), &None),
            Err(MapsError::TileOutOfRange(_))
        ));
    }
}
