//! Gateway client error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur talking to the LLM gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway did not answer within the configured deadline.
    #[error("Gateway timed out")]
    Timeout,

    /// The gateway could not be reached at all.
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway answered with a non-success status.
    #[error("Gateway rejected request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    /// Failed to parse a gateway response.
    #[error("Failed to parse gateway response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayError::Timeout
        } else if error.is_connect() {
            GatewayError::Unreachable(error.to_string())
        } else if error.is_decode() {
            GatewayError::Parse(error.to_string())
        } else {
            GatewayError::Unreachable(error.to_string())
        }
    }
}

impl GatewayError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Unreachable(_))
    }
}
