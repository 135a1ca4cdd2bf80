// HTTP error responses for the relay endpoints

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use super::upstream::RelayError;
use crate::auth::AuthError;
use crate::proxy::NormalizeError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Invalid JSON format")]
    MalformedBody(#[source] serde_json::Error),

    #[error("'messages' must be a list")]
    InvalidMessages,

    #[error("Error connecting to upstream API")]
    UpstreamUnreachable(#[source] reqwest::Error),

    #[error("Upstream error {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::MalformedBody(_) | ApiError::InvalidMessages => StatusCode::BAD_REQUEST,
            ApiError::UpstreamUnreachable(_) | ApiError::UpstreamError { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "authentication_error",
            ApiError::MalformedBody(_) | ApiError::InvalidMessages => "invalid_request_error",
            ApiError::UpstreamUnreachable(_) | ApiError::UpstreamError { .. } => "upstream_error",
            ApiError::Internal(_) => "api_error",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "invalid_api_key",
            ApiError::MalformedBody(_) => "invalid_json",
            ApiError::InvalidMessages => "invalid_messages",
            ApiError::UpstreamUnreachable(_) => "upstream_unreachable",
            ApiError::UpstreamError { .. } => "upstream_status",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::MalformedBody(e) => ApiError::MalformedBody(e),
            NormalizeError::InvalidMessages => ApiError::InvalidMessages,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Unreachable(e) => ApiError::UpstreamUnreachable(e),
            RelayError::Status { status, body } => ApiError::UpstreamError {
                status: status.as_u16(),
                body,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut error = json!({
            "message": self.to_string(),
            "type": self.error_type(),
            "code": self.code(),
        });
        if let ApiError::UpstreamError { status, .. } = &self {
            error["upstream_status"] = json!(status);
        }

        let body = Json(json!({ "error": error }));
        match self {
            ApiError::Unauthenticated(_) => {
                (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}
