//! Maps the core failure taxonomy onto HTTP responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::Error;

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Core error wrapped for transport.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(Error::PreconditionFailed(message.into()))
    }

    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Expired(_) => StatusCode::GONE,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
            Error::PoolExhausted | Error::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ProvisionFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::ExecFailure(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match &self.0 {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Expired(_) => "EXPIRED",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Error::PoolExhausted => "POOL_EXHAUSTED",
            Error::PoolClosed => "POOL_CLOSED",
            Error::Timeout(_) => "TIMEOUT",
            Error::ProvisionFailed { .. } => "PROVISION_FAILED",
            Error::ExecFailure(_) => "EXEC_FAILURE",
            Error::Io(_) => "IO_FAILURE",
        }
    }
}

/// Structured error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.0.to_string();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                error!(error_code = code, message = %message, "API error");
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                warn!(error_code = code, message = %message, "service unavailable");
            }
            _ => {
                debug!(error_code = code, message = %message, "client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
