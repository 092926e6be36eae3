//! Shared error taxonomy.
//!
//! Splits failures the way the system design requires: transient errors are
//! classified as retryable so the bootstrap retry loop can log them
//! differently from a failure that backoff alone won't fix.

use thiserror::Error;

/// Errors surfaced while fetching or applying book state for one symbol.
#[derive(Error, Debug)]
pub enum ReconstructError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("snapshot request returned HTTP {0}")]
    HttpStatus(u16),

    #[error("malformed payload: {0}")]
    Parse(String),
}

impl ReconstructError {
    /// Transient errors (timeouts, connect failures, rate limiting, and
    /// upstream 5xx responses) are expected to clear on their own and are
    /// logged as routine retries. Anything else (a persistent 4xx, or a
    /// payload that fails to parse) still gets retried forever per the
    /// retry-forever policy, but is logged at a higher severity since
    /// waiting alone won't fix it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconstructError::Connection(_))
    }
}

impl From<reqwest::Error> for ReconstructError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReconstructError::Connection("request timed out".to_string())
        } else if err.is_connect() {
            ReconstructError::Connection("failed to connect to exchange".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => ReconstructError::Connection("rate limited by exchange".to_string()),
                418 => ReconstructError::Connection("banned by exchange, backing off".to_string()),
                500..=599 => {
                    ReconstructError::Connection(format!("exchange server error (HTTP {})", status.as_u16()))
                }
                code => ReconstructError::HttpStatus(code),
            }
        } else {
            ReconstructError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ReconstructError {
    fn from(err: serde_json::Error) -> Self {
        ReconstructError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconstructError>;
