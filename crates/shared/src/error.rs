//! Shared error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON error body returned by every failing `/api/*` endpoint.
///
/// ```json
/// {"error": "Invalid email or password"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Attempt to pull a user-facing message out of an error body.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    let detail = parsed.error.trim();
    if detail.is_empty() {
        None
    } else {
        Some(detail.to_string())
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    /// The server rejected the credential. The stored session has already
    /// been cleared by the time a caller sees this.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Message suitable for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => "Unable to reach the server".to_string(),
            ApiError::Unauthorized(detail) => detail.clone(),
            ApiError::Http { status, body } => {
                try_error_detail(body).unwrap_or_else(|| format!("Request failed ({status})"))
            }
            ApiError::Deserialize(_) => "Unexpected response from the server".to_string(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}
