//! Error types for the creel crawler
//!
//! Remote-call failures (`ScrapeError`) carry a transience classifier
//! that drives the pagination retry policy: network and server trouble
//! is retried, authentication failures are not. Persistence failures
//! (`StoreError`) are fatal only when loading the checkpoint at startup;
//! everywhere else they are logged and the crawl continues.

use thiserror::Error;

/// Errors from remote platform calls
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("server returned status {0}")]
    Status(u16),

    /// Request timed out
    #[error("request timeout")]
    Timeout,

    /// Session/cookie rejected by the platform
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Undecodable or truncated response body. Platforms return partial
    /// or garbled payloads under load, so this is retried like a
    /// network failure.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Platform-level error envelope (e.g. non-zero status_code)
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
}

impl ScrapeError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::Status(code) => !matches!(code, 401 | 403),
            Self::Timeout | Self::Decode(_) | Self::Api { .. } => true,
            Self::Auth(_) => false,
        }
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors from checkpoint, proxy-list and sink persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result alias for remote calls
pub type ScrapeResult<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_is_permanent() {
        let err = ScrapeError::Auth("cookie rejected".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(ScrapeError::Status(500).is_transient());
        assert!(ScrapeError::Status(429).is_transient());
        assert!(ScrapeError::Timeout.is_transient());
    }

    #[test]
    fn test_forbidden_is_not_transient() {
        assert!(!ScrapeError::Status(403).is_transient());
        assert!(!ScrapeError::Status(401).is_transient());
    }

    #[test]
    fn test_malformed_body_is_transient() {
        let err: ScrapeError = serde_json::from_str::<i32>("{garbled").unwrap_err().into();
        assert!(matches!(err, ScrapeError::Decode(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_api_envelope_error() {
        let err = ScrapeError::Api {
            code: 8,
            message: "need login".into(),
        };
        assert!(err.to_string().contains("need login"));
        assert!(err.is_transient());
    }
}
