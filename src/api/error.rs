//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::agent::AgentError;
use crate::gateway::GatewayError;
use crate::relay::RelayError;

/// API error type with structured responses.
///
/// Every failure maps to exactly one variant; upstream failures keep their
/// own variants so timeouts (504) stay distinct from unreachable backends
/// (502) and from rejections that pass the upstream status through.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream rejected request: {body}")]
    UpstreamRejected { status: StatusCode, body: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn upstream_timeout(msg: impl Into<String>) -> Self {
        Self::UpstreamTimeout(msg.into())
    }

    pub fn upstream_unreachable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnreachable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRejected { status, .. } => *status,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "VALIDATION_FAILURE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            Self::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::UpstreamTimeout(msg)
            | ApiError::UpstreamUnreachable(msg)
            | ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Upstream failure");
            }
            ApiError::UpstreamRejected { status, body } => {
                warn!(error_code = code, status = %status, body = %body, "Upstream rejection");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

/// Repository and wiring errors surface as 500s.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        use crate::auth::AuthError;
        match err {
            AuthError::MissingAuthHeader | AuthError::InvalidAuthHeader => {
                ApiError::Unauthorized("Missing or invalid authorization".to_string())
            }
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(format!("Invalid token: {msg}")),
            AuthError::TokenExpired => ApiError::Unauthorized("Token has expired".to_string()),
            AuthError::UserNotFound => ApiError::Unauthorized("User not found".to_string()),
            AuthError::Internal(msg) => ApiError::Internal(format!("Authentication error: {msg}")),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => ApiError::UpstreamTimeout("LLM gateway timeout".to_string()),
            GatewayError::Unreachable(msg) => ApiError::UpstreamUnreachable(msg),
            GatewayError::Rejected { status, body } => ApiError::UpstreamRejected { status, body },
            GatewayError::Parse(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotFound(agent_ref) => {
                ApiError::NotFound(format!("Agent not found: {agent_ref}"))
            }
            AgentError::Rejected { status, body } => ApiError::UpstreamRejected { status, body },
            AgentError::RequestFailed(e) if e.is_timeout() => {
                ApiError::UpstreamTimeout("Agent host timeout".to_string())
            }
            AgentError::RequestFailed(e) => ApiError::UpstreamUnreachable(e.to_string()),
            AgentError::Parse(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::EmptyMessage => ApiError::BadRequest("Message cannot be empty".to_string()),
            RelayError::NoAgent => {
                ApiError::NotFound("No agent provisioned for this user".to_string())
            }
            RelayError::EmptyResponse => {
                ApiError::UpstreamUnreachable("Agent returned an empty response".to_string())
            }
            RelayError::Upstream(msg) => ApiError::UpstreamUnreachable(format!("Agent error: {msg}")),
            RelayError::Storage(e) => e.into(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::not_found("").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::bad_request("").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::unauthorized("").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::upstream_timeout("").status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::upstream_unreachable("").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::internal("").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rejection_passes_upstream_status() {
        let err = ApiError::UpstreamRejected {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "rate limited".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.error_code(), "UPSTREAM_REJECTED");
    }

    #[test]
    fn test_gateway_timeout_maps_to_504() {
        let err: ApiError = GatewayError::Timeout.into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_relay_errors_map() {
        let err: ApiError = RelayError::EmptyMessage.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = RelayError::NoAgent.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = RelayError::Upstream("boom".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
