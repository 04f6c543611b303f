//! Error types for the BAS assistant

use thiserror::Error;

/// Result type alias for BAS assistant operations
pub type Result<T> = std::result::Result<T, BasError>;

#[derive(Error, Debug)]
pub enum BasError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// The payload is not something the pipeline can work with at all
    /// (not a mapping, or no invoice text was extracted).
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
