//! Error types shared across Wisp components.

use thiserror::Error;

/// Errors that can occur in blob storage.
#[derive(Debug, Error)]
pub enum BlobError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Blob id is not a plain file name.
    #[error("invalid blob id: {0}")]
    InvalidId(String),
}

/// Errors reported by a conversation engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine could not start a reply. Retryable.
    #[error("conversation engine unavailable: {0}")]
    Unavailable(String),

    /// The engine failed part-way through a reply.
    #[error("reply stream failed: {0}")]
    Stream(String),
}

/// Errors reported by a pixel capture source.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// No frame could be captured right now (locked screen, no client frame).
    #[error("capture unavailable: {0}")]
    Unavailable(String),
}
