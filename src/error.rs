//! Error types for Pacer
//!
//! Centralized error handling using thiserror. Failures of scheduled work are
//! reported through [`crate::scheduler::SchedulerError`]; this type covers the
//! surrounding plumbing (configuration, HTTP client setup, serialization).

use thiserror::Error;

/// All error types that can occur outside of a scheduled unit of work
#[derive(Debug, Error)]
pub enum PacerError {
    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Pacer operations
pub type Result<T> = std::result::Result<T, PacerError>;
