//! Shared error types.

use serde::Deserialize;

/// Error body returned by the backend on failed requests.
///
/// Field names vary between endpoints, so every field is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Attempt to pull a user-facing message out of a JSON error body.
/// Prefers `detail`, then `message`, `error` and finally `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    [parsed.detail, parsed.message, parsed.error, parsed.title]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Human-readable message, preferring the backend's own wording for HTTP errors.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                try_problem_detail(body).unwrap_or_else(|| self.to_string())
            }
            _ => self.to_string(),
        }
    }
}
