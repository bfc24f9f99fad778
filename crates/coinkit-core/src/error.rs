//! Error types for CoinKit

use std::time::Duration;

use thiserror::Error;

/// Result type alias using CoinKit's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for CoinKit operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error outside of a source adapter
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A source adapter failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A metric value could not be turned into a number
    #[error("Metric {key} has a non-numeric value: {reason}")]
    NumericCoercion { key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Another evaluation cycle holds the cycle lock
    #[error("An evaluation cycle is already in flight")]
    CycleInFlight,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a numeric coercion error
    pub fn coercion(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NumericCoercion {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure of a single source adapter. Never fatal to a cycle.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network or upstream failure that will likely clear on the next poll
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// Upstream answered 429
    #[error("Rate limited by upstream")]
    RateLimited,

    /// The payload is missing fields we depend on
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The adapter exceeded its per-cycle budget
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            return Self::RateLimited;
        }
        if err.is_decode() {
            return Self::Malformed(err.to_string());
        }
        Self::Transient(err.to_string())
    }
}
