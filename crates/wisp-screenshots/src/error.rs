//! Error types for the screenshot store.

use thiserror::Error;

/// Errors that can occur while capturing or storing screenshots.
#[derive(Debug, Error)]
pub enum ScreenshotError {
    /// No frame could be captured. Transient.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Blob storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] wisp_core::BlobError),
}

impl From<wisp_core::CaptureError> for ScreenshotError {
    fn from(err: wisp_core::CaptureError) -> Self {
        match err {
            wisp_core::CaptureError::Unavailable(reason) => Self::CaptureUnavailable(reason),
        }
    }
}
