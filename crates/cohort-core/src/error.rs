//! Error types for the Cohort core library.

use thiserror::Error;

/// Result type alias using the Cohort core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Cohort operations.
#[derive(Debug, Error)]
pub enum Error {
    /// NDJSON parsing error
    #[error("Failed to parse NDJSON: {0}")]
    NdjsonParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Group definition error (invalid budget, concurrency, or session fields)
    #[error("Invalid group definition: {0}")]
    InvalidGroup(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
