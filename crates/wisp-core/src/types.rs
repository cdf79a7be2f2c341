//! Session and message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque client-supplied session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Longest token accepted from a client.
    pub const MAX_LEN: usize = 256;

    /// Parse a client token.
    ///
    /// Returns `None` for empty, oversized, or control-character tokens.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > Self::MAX_LEN
            || trimmed.chars().any(char::is_control)
        {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine-side conversation identifier. Opaque to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh handle for a new session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Reference to bytes held in a [`crate::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    pub id: String,
    pub size: u64,
    pub media_type: String,
}

/// Message payload. Binary payloads are always blob references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Image { blob: BlobRef },
    Audio { blob: BlobRef },
    File { blob: BlobRef, filename: String },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Audio { .. } => MessageKind::Audio,
            Self::File { .. } => MessageKind::File,
        }
    }

    /// Size of the payload in bytes (UTF-8 length for text).
    pub fn payload_size(&self) -> u64 {
        match self {
            Self::Text { text } => text.len() as u64,
            Self::Image { blob } | Self::Audio { blob } | Self::File { blob, .. } => blob.size,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn blob(&self) -> Option<&BlobRef> {
        match self {
            Self::Text { .. } => None,
            Self::Image { blob } | Self::Audio { blob } | Self::File { blob, .. } => Some(blob),
        }
    }
}

/// Discriminant of [`MessageBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of proactive trigger.
///
/// Declaration order is evaluation priority: an explicit event beats a
/// scheduled window beats pure chance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    WindowChange,
    TimeWindow,
    RandomInterval,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 3] = [
        TriggerKind::WindowChange,
        TriggerKind::TimeWindow,
        TriggerKind::RandomInterval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindowChange => "window_change",
            Self::TimeWindow => "time_window",
            Self::RandomInterval => "random_interval",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Foreground window last reported by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
}

impl WindowDescriptor {
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.process.as_deref())
            .unwrap_or("unknown window")
    }
}

/// What the engine is told about a system-initiated turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveContext {
    /// Trigger that fired, or `None` for an operator-requested turn.
    pub trigger: Option<TriggerKind>,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<BlobRef>,
}

/// Who started a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Origin {
    User,
    System { context: ProactiveContext },
}

impl Origin {
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System { .. } => "system",
        }
    }
}

/// A sequenced conversation message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    token: SessionToken,
    direction: Direction,
    origin: Origin,
    sequence: u64,
    body: MessageBody,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        token: SessionToken,
        direction: Direction,
        origin: Origin,
        sequence: u64,
        body: MessageBody,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            direction,
            origin,
            sequence,
            body,
            created_at,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A normalized inbound message that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub token: SessionToken,
    pub origin: Origin,
    pub body: MessageBody,
    /// Credentials presented with the request, checked on first contact.
    pub credentials: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// A message typed by the user.
    pub fn user(token: SessionToken, body: MessageBody, received_at: DateTime<Utc>) -> Self {
        Self {
            token,
            origin: Origin::User,
            body,
            credentials: None,
            received_at,
        }
    }

    /// A synthetic system-initiated message.
    pub fn system(
        token: SessionToken,
        context: ProactiveContext,
        body: MessageBody,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            origin: Origin::System { context },
            body,
            credentials: None,
            received_at,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// One piece of a streamed reply.
///
/// Every chunk of a reply carries the reply's sequence number; `index`
/// orders chunks within the reply and exactly one chunk per reply is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    pub message: Message,
    pub index: u32,
    pub is_final: bool,
    /// Set when the reply ended in a terminal delivery failure.
    pub failure: Option<String>,
}

impl OutboundChunk {
    pub fn sequence(&self) -> u64 {
        self.message.sequence()
    }
}
