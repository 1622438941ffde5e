//! Error types for the recorded-data toolkit.

use std::path::PathBuf;
use thiserror::Error;

/// Storage adapter errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unsupported storage engine: {0}")]
    UnsupportedEngine(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("PQL syntax error at position {position}: {message}")]
    PqlSyntax { position: usize, message: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Document is missing `_uuid`")]
    MissingUuid,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Public error taxonomy of the catalogue and the model layer
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database not initialised: {0}")]
    DatabaseNotInitialised(String),

    #[error("Invalid database config: {0}")]
    InvalidDatabaseConfig(String),

    #[error("Schema not found: api_version={api_version}, kind={kind}")]
    SchemaNotFound { api_version: String, kind: String },

    #[error("Schema violation for {kind}: {}", violations.join("; "))]
    SchemaViolation {
        kind: String,
        violations: Vec<String>,
    },

    #[error("Key '{0}' is reserved and cannot be modified")]
    ReservedKey(String),

    #[error("Registration closed: {0}")]
    RegistrationClosed(String),

    #[error("No suitable model found for metadata: {0}")]
    NoModelMatched(String),

    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Empty stream: {0}")]
    EmptyStream(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown setting '{key}' for {model}")]
    UnknownSetting { model: String, key: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::DataError(err.to_string())
    }
}

impl From<csv::Error> for ApiError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => ApiError::IoFailure(io),
            other => ApiError::DataError(format!("CSV error: {:?}", other)),
        }
    }
}

impl From<ndarray::ShapeError> for ApiError {
    fn from(err: ndarray::ShapeError) -> Self {
        ApiError::DataError(format!("Array shape error: {}", err))
    }
}
