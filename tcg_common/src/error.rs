//! Error type for remote card catalog lookups

use reqwest::StatusCode;
use thiserror::Error;

/// Why a remote catalog lookup produced no usable answer
#[derive(Debug, Error)]
pub enum LookupError {
    /// Connection failed, TLS error, body could not be read, etc.
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    /// The request did not finish within the configured timeout
    #[error("Remote lookup timed out")]
    Timeout,
    /// The service rejected the query itself (HTTP 400)
    #[error("Remote rejected the query")]
    BadRequest,
    /// HTTP 429
    #[error("Remote rate limit exceeded")]
    RateLimited,
    /// Any other non-success status
    #[error("HTTP error: {0}")]
    HttpStatus(StatusCode),
    /// Response body was not the expected JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl LookupError {
    /// Classify a response status. Returns `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status == StatusCode::BAD_REQUEST {
            Some(LookupError::BadRequest)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(LookupError::RateLimited)
        } else {
            Some(LookupError::HttpStatus(status))
        }
    }

    /// A rejected query means "nothing matches", not an outage
    pub fn is_no_results(&self) -> bool {
        matches!(self, LookupError::BadRequest)
    }

    /// Anything that should send a search down its fallback chain
    pub fn is_hard_failure(&self) -> bool {
        !self.is_no_results()
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LookupError::Timeout
        } else {
            LookupError::Network(err)
        }
    }
}
