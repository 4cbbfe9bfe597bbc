//! API error types.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::multipart::MultipartRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hatch_storage::StorageError;
use serde::Serialize;

/// Message returned to clients in place of 5xx error detail.
const INTERNAL_MESSAGE: &str = "internal server error";

/// Body clients receive while an upload lock is active.
pub const SERVER_UPDATE: &str = "SERVER_UPDATE";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// An upload lock is active for the requested bundle.
    #[error("update in progress")]
    UpdateInProgress,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Core(#[from] hatch_core::Error),

    #[error("signer error: {0}")]
    Signer(#[from] hatch_signer::SignerError),
}

/// Status for lock conflicts; clients retry after backing off.
pub fn update_in_progress_status() -> StatusCode {
    StatusCode::from_u16(520).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpdateInProgress => update_in_progress_status(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::InvalidPath(_) => StatusCode::NOT_FOUND,
                StorageError::UpdateInProgress(_) => update_in_progress_status(),
                StorageError::PublishInProgress(_) => StatusCode::CONFLICT,
                StorageError::InvalidBundle(_)
                | StorageError::MissingField(_)
                | StorageError::Upload(_)
                | StorageError::Core(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Signer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Server-side failures are reduced to a
    /// generic message.
    pub fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            if matches!(
                self,
                Self::UpdateInProgress | Self::Storage(StorageError::UpdateInProgress(_))
            ) {
                return SERVER_UPDATE.to_string();
            }
            return INTERNAL_MESSAGE.to_string();
        }
        match self {
            Self::Storage(StorageError::MissingField(field)) => {
                format!("missing required field: {field}")
            }
            Self::Storage(e) => e.to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
