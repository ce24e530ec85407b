use reqwest::StatusCode;
use thiserror::Error;

/// Classified failure of a single upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Rate limited fetching {url}")]
    RateLimited { url: String },

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl FetchError {
    /// Classify a non-success HTTP status. Returns `None` for 2xx/3xx.
    pub fn from_status(url: &str, status: StatusCode) -> Option<Self> {
        if status.is_success() || status.is_redirection() {
            return None;
        }
        let url = url.to_string();
        Some(match status.as_u16() {
            429 | 503 => FetchError::RateLimited { url },
            404 | 410 => FetchError::NotFound { url },
            _ => FetchError::Transient {
                url,
                reason: format!("HTTP {}", status),
            },
        })
    }

    /// Timeouts, connection resets and body read errors.
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        FetchError::Transient {
            url: url.to_string(),
            reason,
        }
    }

    /// Short label used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::NotFound { .. } => "not_found",
            FetchError::Transient { .. } => "transient",
            FetchError::Malformed { .. } => "malformed",
        }
    }
}
