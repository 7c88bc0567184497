//! Error types for the audit model.

use thiserror::Error;

/// Model operation result type.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while parsing audit or action documents.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Document is not valid JSON or is missing a required field
    #[error("Invalid audit document: {0}")]
    InvalidDocument(String),

    /// Timestamp could not be parsed as ISO-8601
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_document(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }
}
