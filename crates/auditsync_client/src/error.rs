//! API error types.

use thiserror::Error;

/// Errors that can occur when talking to the inspection API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API kept answering 429 after the allowed retries.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The remote side gave up rendering a document.
    #[error("report export for audit {audit_id} ended with status {status}")]
    ExportFailed { audit_id: String, status: String },

    #[error("API token cannot be used as a header value")]
    InvalidToken,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
