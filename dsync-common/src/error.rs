//! Common error types for dicom-sync

use thiserror::Error;

/// Common result type for dicom-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the dicom-sync crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, used by the stability state file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unparsable day specifier or date range
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Requested resource not found (e.g. unknown remote node)
    #[error("Not found: {0}")]
    NotFound(String),
}
