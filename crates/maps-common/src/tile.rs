//! Slippy-map tile addressing and Web-Mercator envelope math.
//!
//! Tiles use the XYZ convention: origin at the top-left, rows increasing
//! downward, `2^zoom` rows and columns per zoom level.

use crate::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Half the Web-Mercator world extent in meters (EPSG:3857).
pub const WEB_MERCATOR_EXTENT: f64 = 20037508.3427892;

/// Deepest zoom level the tile grid is addressed at.
pub const MAX_ZOOM: u32 = 22;

/// Supported vector tile formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    Pbf,
    Mvt,
}

impl TileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileFormat::Pbf => "pbf",
            TileFormat::Mvt => "mvt",
        }
    }

    /// Both formats carry the same MVT payload.
    pub fn content_type(&self) -> &'static str {
        "application/vnd.mapbox-vector-tile"
    }
}

impl FromStr for TileFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pbf" => Ok(TileFormat::Pbf),
            "mvt" => Ok(TileFormat::Mvt),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tile request parsed from a `Z/X/Y.FORMAT` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRequest {
    pub zoom: u32,
    pub x: u32,
    pub y: u32,
    pub format: TileFormat,
}

impl TileRequest {
    pub fn new(zoom: u32, x: u32, y: u32, format: TileFormat) -> Self {
        Self { zoom, x, y, format }
    }

    /// Parse a `Z/X/Y.FORMAT` path (leading slash allowed).
    ///
    /// Returns `None` on any non-matching shape: wrong segment count,
    /// non-numeric indices, or an unknown format suffix.
    pub fn from_path(path: &str) -> Option<TileRequest> {
        let mut parts = path.trim_start_matches('/').split('/');

        let zoom = parts.next()?.parse().ok()?;
        let x = parts.next()?.parse().ok()?;
        let last = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let (y, format) = last.split_once('.')?;
        let y = y.parse().ok()?;
        let format = format.parse().ok()?;

        Some(TileRequest { zoom, x, y, format })
    }

    /// True iff the x/y indices fit the zoom level's `2^zoom` grid.
    ///
    /// Out-of-range indices fail validation rather than being clamped.
    pub fn is_valid(&self) -> bool {
        if self.zoom > MAX_ZOOM {
            return false;
        }
        let n = 1u64 << self.zoom;
        (self.x as u64) < n && (self.y as u64) < n
    }

    /// Web-Mercator (EPSG:3857) envelope for this tile.
    ///
    /// The y axis is flipped: tile rows increase downward while Mercator y
    /// increases upward. Zoom 0 maps to the full world envelope.
    pub fn envelope(&self) -> BoundingBox {
        let world = 2.0 * WEB_MERCATOR_EXTENT;
        let span = world / (1u64 << self.zoom) as f64;

        let min_x = -WEB_MERCATOR_EXTENT + self.x as f64 * span;
        let max_y = WEB_MERCATOR_EXTENT - self.y as f64 * span;

        BoundingBox::new(min_x, max_y - span, min_x + span, max_y)
    }

    /// Generate a cache key string.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}.{}", self.zoom, self.x, self.y, self.format)
    }
}
