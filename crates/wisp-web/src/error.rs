//! Error types for the HTTP gateway.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use wisp_bridge::BridgeError;
use wisp_core::BlobError;
use wisp_scheduler::SchedulerError;
use wisp_screenshots::ScreenshotError;

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum WebError {
    /// Bridge error.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Screenshot store error.
    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),

    /// Blob store error.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The request body or path was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Bridge(e) => bridge_status(e),
            Self::Scheduler(SchedulerError::Disabled) => StatusCode::CONFLICT,
            Self::Scheduler(SchedulerError::UnknownSession(_)) => StatusCode::NOT_FOUND,
            Self::Scheduler(SchedulerError::Bridge(e)) => bridge_status(e),
            Self::Screenshot(ScreenshotError::CaptureUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Screenshot(ScreenshotError::Storage(e)) | Self::Blob(e) => blob_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Bridge(e) | Self::Scheduler(SchedulerError::Bridge(e)) => e.is_retryable(),
            Self::Screenshot(ScreenshotError::CaptureUnavailable(_)) => true,
            _ => false,
        }
    }
}

fn bridge_status(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        BridgeError::SessionDenied(_) => StatusCode::BAD_REQUEST,
        BridgeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        BridgeError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
        BridgeError::EngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::UnknownSession(_) => StatusCode::NOT_FOUND,
    }
}

fn blob_status(error: &BlobError) -> StatusCode {
    match error {
        BlobError::NotFound(_) => StatusCode::NOT_FOUND,
        BlobError::InvalidId(_) => StatusCode::BAD_REQUEST,
        BlobError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = json!({
            "error": self.to_string(),
            "retryable": self.retryable(),
        });
        (status, Json(body)).into_response()
    }
}
