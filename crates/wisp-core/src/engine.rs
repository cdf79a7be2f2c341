//! Interfaces for external collaborators.
//!
//! The bridge never talks to an AI model, an auth backend or the screen
//! directly; it goes through these traits so each can be swapped or mocked.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{CaptureError, ConversationHandle, EngineError, Message, MessageBody, SessionToken};

/// A finite, non-restartable sequence of reply chunks.
pub type ReplyStream = BoxStream<'static, Result<MessageBody, EngineError>>;

/// The conversation backend that produces replies.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Start a reply to `message` within `conversation`.
    ///
    /// The message's origin tells the engine whether the turn was typed by
    /// the user or initiated by the proactive scheduler.
    async fn respond(
        &self,
        conversation: &ConversationHandle,
        message: &Message,
    ) -> Result<ReplyStream, EngineError>;

    /// Release any in-flight turn for `conversation`.
    async fn release(&self, _conversation: &ConversationHandle) {}
}

/// Result of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Accepted,
    Denied,
}

/// Black-box credential check performed on first contact.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, token: &SessionToken, credentials: Option<&str>) -> AuthDecision;
}

/// Raw image bytes from a capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl CapturedFrame {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            media_type: "image/png".to_string(),
        }
    }
}

/// Acquires desktop pixels.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture_pixels(&self) -> Result<CapturedFrame, CaptureError>;
}
