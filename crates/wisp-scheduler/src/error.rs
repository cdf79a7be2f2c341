//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Proactive dialogue is turned off.
    #[error("proactive dialogue is disabled")]
    Disabled,

    /// No live session for the token.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Bridge error.
    #[error("bridge error: {0}")]
    Bridge(#[from] wisp_bridge::BridgeError),
}
