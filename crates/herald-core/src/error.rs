use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// DNS resolution or connection-level failure. Never retried.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out. Treated as a retryable network error.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Origin answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Payload rejected by the content validity check.
    #[error("Content validation failed: {0}")]
    ContentValidation(String),

    /// Breaker fast-fail. Not a real attempt.
    #[error("Circuit for source '{source_id}' is open, retry after {}s", retry_after.as_secs())]
    CircuitOpen {
        source_id: String,
        retry_after: Duration,
    },

    /// Every tier was exhausted and no cached copy could be served.
    #[error("All sources exhausted: no healthy source and no usable cache")]
    AllSourcesExhausted,

    /// No source with the given id is known to the store.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Fetched payload could not be turned into content items.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error (missing or malformed settings).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Coarse, serialisable classification of an [`AppError`].
///
/// Carried in [`crate::models::ScrapeOutcome`] so downstream consumers can
/// react to failures without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    HttpStatus,
    ContentValidation,
    CircuitOpen,
    AllSourcesExhausted,
    Parse,
    Storage,
    Config,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::ContentValidation => "content_validation",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::AllSourcesExhausted => "all_sources_exhausted",
            ErrorKind::Parse => "parse",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP statuses that usually mean "you look like a bot" rather than "the page is gone".
pub const BLOCKING_STATUSES: [u16; 5] = [401, 403, 405, 406, 429];

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_) | AppError::ContentValidation(_) | AppError::HttpStatus { .. }
        )
    }

    /// Returns true if this error should count as a failure against the source's circuit.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::HttpStatus { .. }
                | AppError::ContentValidation(_)
                | AppError::ParseError(_)
        )
    }

    /// Returns true for statuses that trigger the byte-range fallback.
    pub fn is_blocking_status(&self) -> bool {
        matches!(self, AppError::HttpStatus { status, .. } if BLOCKING_STATUSES.contains(status))
    }

    /// Returns true for 429 responses, which lengthen the breaker cool-down.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AppError::HttpStatus { status: 429, .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NetworkError(_) => ErrorKind::Network,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::HttpStatus { .. } => ErrorKind::HttpStatus,
            AppError::ContentValidation(_) => ErrorKind::ContentValidation,
            AppError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            AppError::AllSourcesExhausted => ErrorKind::AllSourcesExhausted,
            AppError::ParseError(_) | AppError::SerializationError(_) => ErrorKind::Parse,
            AppError::DatabaseError(_) => ErrorKind::Storage,
            AppError::ConfigError(_) => ErrorKind::Config,
            AppError::SourceNotFound(_) | AppError::Generic(_) => ErrorKind::Other,
        }
    }
}
