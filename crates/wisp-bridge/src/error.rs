//! Error types for the message bridge.

use thiserror::Error;

/// Errors that can occur while ingesting or delivering messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The authorizer denied first contact. No session was created.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The inbound message was malformed.
    #[error("session denied: {0}")]
    SessionDenied(String),

    /// The inbound payload exceeded the configured limit.
    #[error("payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// The session's delivery queue is full. Retryable.
    #[error("delivery queue full for session {0}")]
    QueueFull(String),

    /// The engine stayed unavailable through every retry attempt.
    #[error("conversation engine unavailable after {attempts} attempts: {message}")]
    EngineUnavailable { attempts: u32, message: String },

    /// No live session exists for the token.
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl BridgeError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull(_) | Self::EngineUnavailable { .. })
    }
}
