use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tasknest_core::gateway::GatewayError;
use tasknest_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Sync is not configured on this gateway")]
    SyncNotConfigured,
    #[error("A sync pass is already in progress")]
    SyncInProgress,
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<SyncError> for AppError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::InProgress => Self::SyncInProgress,
            SyncError::Store(error) => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) | Self::Gateway(GatewayError::InvalidRequest(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SyncNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::SyncInProgress => StatusCode::CONFLICT,
            Self::Gateway(GatewayError::Network(_) | GatewayError::InstallFailed { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Gateway(GatewayError::Store(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
