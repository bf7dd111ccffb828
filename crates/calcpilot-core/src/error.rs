//! Unified error types for calcpilot

use thiserror::Error;

/// Unified error type for all calcpilot operations
#[derive(Error, Debug)]
pub enum CalcError {
    // Session errors
    #[error("Spreadsheet session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Spreadsheet session error: {0}")]
    Session(String),

    #[error("Session protocol error: {0}")]
    Protocol(String),

    #[error("Invalid cell reference: {0}")]
    InvalidCellRef(String),

    #[error("Operation rejected: {0}")]
    OperationRejected(String),

    // Model errors
    #[error("Model API error: {0}")]
    Api(String),

    #[error("Model API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Model returned no content: {0}")]
    EmptyResponse(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using CalcError
pub type Result<T> = std::result::Result<T, CalcError>;
