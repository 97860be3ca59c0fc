//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility: these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while calling the language model.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the allotted time.
    #[error("inference timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response envelope did not contain extractable text.
    #[error("unexpected response schema: {reason}")]
    SchemaMismatch { reason: String },

    /// Every model in the fallback chain failed.
    #[error("all models unavailable (tried: {})", attempted.join(", "))]
    AllModelsUnavailable { attempted: Vec<String> },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether this error should move the client to the next model in the
    /// fallback chain.
    ///
    /// 404 covers a model that is not deployed at the endpoint; 429 and 5xx are
    /// treated as transient.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 404, .. }
                | InferenceError::HttpError { status: 429, .. }
                | InferenceError::HttpError { status: 500, .. }
                | InferenceError::HttpError { status: 502..=504, .. }
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .map(|u| format!("{}://{}{}", u.scheme(), u.host_str().unwrap_or(""), u.path()))
            .unwrap_or_default();
        if e.is_timeout() {
            InferenceError::Timeout { duration_ms: 0 }
        } else {
            InferenceError::ConnectionFailed {
                endpoint,
                reason: e.to_string(),
            }
        }
    }
}
