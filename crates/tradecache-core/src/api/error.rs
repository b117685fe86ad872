use reqwest::StatusCode;
use thiserror::Error;

/// Longest response body quoted in an error, in bytes.
const MAX_QUOTED_BODY: usize = 500;

/// Failures talking to the preferences endpoint.
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401; the session token is missing or expired.
    #[error("Not signed in or session expired")]
    Unauthorized,

    #[error("Preferences access denied: {0}")]
    AccessDenied(String),

    #[error("Preferences endpoint not found: {0}")]
    NotFound(String),

    /// Still 429 after every retry.
    #[error("Preferences endpoint is rate limiting")]
    RateLimited,

    #[error("Preferences server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected preferences response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Map a non-success status to an error, quoting at most
    /// `MAX_QUOTED_BODY` bytes of `body`.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let quoted = quote_body(body);
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::AccessDenied(quoted),
            StatusCode::NOT_FOUND => ApiError::NotFound(quoted),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            s if s.is_server_error() => ApiError::ServerError(quoted),
            s => ApiError::InvalidResponse(format!("Status {}: {}", s, quoted)),
        }
    }

    /// Whether the next reconciliation cycle might succeed without the user
    /// doing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::ServerError(_) | ApiError::NetworkError(_)
        )
    }
}

fn quote_body(body: &str) -> String {
    if body.len() <= MAX_QUOTED_BODY {
        return body.to_string();
    }
    let mut end = MAX_QUOTED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}
