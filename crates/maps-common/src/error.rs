//! Error types for the gigamaps tile services.

use thiserror::Error;

/// Result type alias using MapsError.
pub type MapsResult<T> = Result<T, MapsError>;

/// Primary error type for tile and info operations.
#[derive(Debug, Error)]
pub enum MapsError {
    // === Request Errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Invalid tile path: {0}")]
    InvalidTilePath(String),

    #[error("Tile out of range: {0}")]
    TileOutOfRange(String),

    #[error("Requested tile format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Data layer not found: {0}")]
    LayerNotFound(i64),

    // === Configuration Errors ===
    #[error("Invalid layer configuration: {0}")]
    ConfigError(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    // === Infrastructure Errors ===
    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Request timeout")]
    Timeout,
}

impl MapsError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            MapsError::MissingParameter(_)
            | MapsError::InvalidParameter { .. }
            | MapsError::InvalidTilePath(_)
            | MapsError::TileOutOfRange(_)
            | MapsError::UnsupportedFormat(_) => 400,

            MapsError::LayerNotFound(_) => 404,

            MapsError::Timeout => 504,

            _ => 500,
        }
    }

    /// Message safe to put in a client-facing error body.
    ///
    /// Request errors carry their own text; storage and internal errors are
    /// collapsed to a generic message so driver detail and generated SQL
    /// stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            MapsError::MissingParameter(_)
            | MapsError::InvalidParameter { .. }
            | MapsError::InvalidTilePath(_)
            | MapsError::TileOutOfRange(_)
            | MapsError::UnsupportedFormat(_)
            | MapsError::LayerNotFound(_) => self.to_string(),

            MapsError::DatabaseError(_) => "query execution failed".to_string(),
            MapsError::CacheError(_) => "cache unavailable".to_string(),
            MapsError::QueueError(_) => "refresh queue unavailable".to_string(),
            MapsError::Timeout => "request timeout".to_string(),

            _ => "internal server error".to_string(),
        }
    }
}

// Conversion from common error types
impl From<serde_json::Error> for MapsError {
    fn from(err: serde_json::Error) -> Self {
        MapsError::InternalError(format!("JSON error: {}", err))
    }
}
