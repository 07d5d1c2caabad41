//! HTTP mapping for gateway errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use vibestudy_core::{StoreError, VibeError};

/// Wraps [`VibeError`] so handlers can return it with `?`.
#[derive(Debug)]
pub struct ApiError(pub VibeError);

impl From<VibeError> for ApiError {
    fn from(err: VibeError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(VibeError::Store(err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VibeError::Unauthorized => StatusCode::UNAUTHORIZED,
            VibeError::Forbidden(_) => StatusCode::FORBIDDEN,
            VibeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // Lets the sync client retry.
            VibeError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            VibeError::Store(_) | VibeError::ConfigError(_) | VibeError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, %status, "Request failed");
        }
        // Internal details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
