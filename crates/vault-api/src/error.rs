use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use vault_types::api::ErrorResponse;

/// Everything a handler can answer with instead of a success payload.
///
/// Messages are shown to the caller verbatim, except for `Storage`, whose
/// cause is logged and replaced with a generic message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    /// Credentials or session rejected. One message per failure class,
    /// never more specific.
    #[error("{0}")]
    Auth(&'static str),

    /// Missing or invalid bearer token on a protected route.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Auth(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to put in the response body.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Storage(cause) = &self {
            error!("Request failed in storage layer: {:#}", cause);
        }

        let body = ErrorResponse {
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
