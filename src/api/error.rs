use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::error::CoreError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    ValidationError(String),

    Unauthorized(String),

    Conflict(String),

    /// An upstream could not be reached. The cause is logged, not returned.
    BadGateway(String),

    /// Logged with its kind, answered with a generic message.
    InternalError { kind: &'static str, message: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::BadGateway(msg) => write!(f, "Bad gateway: {msg}"),
            Self::InternalError { kind, message } => write!(f, "Internal error ({kind}): {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::BadGateway(msg) => {
                tracing::warn!(error = %msg, "Upstream fetch failed");
                (StatusCode::BAD_GATEWAY, "upstream fetch failed".to_string())
            }
            Self::InternalError { kind, message } => {
                tracing::error!(kind, error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            CoreError::InvalidInput { .. } => Self::ValidationError(err.to_string()),
            CoreError::Unauthorized | CoreError::InvalidToken => {
                Self::Unauthorized(err.to_string())
            }
            CoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::InternalError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Proxy fetch failures: a missing upstream is a gateway problem.
    #[must_use]
    pub fn upstream(err: CoreError) -> Self {
        match err {
            CoreError::UpstreamTransport { .. } | CoreError::UpstreamStatus { .. } => {
                Self::BadGateway(err.to_string())
            }
            other => other.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError {
            kind: "internal",
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: CoreError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn core_errors_map_to_statuses() {
        assert_eq!(status_of(CoreError::not_found("anime")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::invalid("size", "too big")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(CoreError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(CoreError::Conflict("job running".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CoreError::UpstreamStatus {
                service: "hianime",
                code: 503
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(CoreError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unreachable_upstreams_are_bad_gateway() {
        let transport = CoreError::UpstreamTransport {
            service: "proxy",
            cause: "connection refused".into(),
        };
        assert_eq!(
            ApiError::upstream(transport).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::upstream(CoreError::Cancelled).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
