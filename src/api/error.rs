/// Transport-level failures surfaced by an [`ApiGateway`](super::ApiGateway).
///
/// Messages carried by the variants are the backend-provided text when the
/// response body had one.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Token invalid or expired")]
    Unauthorized,
    #[error("Rejected by server: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited; try again later")]
    RateLimited,
    #[error("Server error: {0}")]
    Server(String),
    #[error("HTTP error: {0}")]
    Transport(String),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl ApiError {
    /// Whether repeating the same idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited | Self::Server(_))
    }
}

/// Map an HTTP error status and its body to an [`ApiError`].
pub(crate) fn map_status_error(code: u16, body: &str) -> ApiError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {code}"));
    match code {
        400 | 422 => ApiError::BadRequest(message),
        401 => ApiError::Unauthorized,
        404 => ApiError::NotFound(message),
        429 => ApiError::RateLimited,
        500..=599 => ApiError::Server(message),
        _ => ApiError::Transport(format!("HTTP {code}: {message}")),
    }
}

/// Pull a human readable message out of an error body.
///
/// Accepts `{"error": ..}`, `{"detail": ..}` and `{"message": ..}` objects and
/// falls back to the trimmed body text.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            for key in ["error", "detail", "message", "msg"] {
                match value.get(key) {
                    Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
                        return Some(text.trim().to_string());
                    }
                    Some(serde_json::Value::Null) | None => {}
                    Some(other) => return Some(other.to_string()),
                }
            }
        }
    }
    Some(trimmed.to_string())
}
