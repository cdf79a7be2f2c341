//! Shared message model and collaborator interfaces for Wisp.
//!
//! This crate provides:
//! - The session, message and outbound chunk types every component exchanges
//! - Interfaces for the external collaborators (conversation engine,
//!   authorization, pixel capture)
//! - A blob store so image, audio and file payloads never live in memory
//! - An injectable clock for deterministic timing in tests

pub mod blob;
mod clock;
mod engine;
mod error;
mod types;

pub use blob::{BlobStore, FsBlobStore, StoredBlob, prune_before};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    AuthDecision, Authorizer, CaptureSource, CapturedFrame, ConversationEngine, ReplyStream,
};
pub use error::{BlobError, CaptureError, EngineError};
pub use types::{
    BlobRef, ConversationHandle, Direction, InboundMessage, Message, MessageBody, MessageKind,
    Origin, OutboundChunk, ProactiveContext, SessionToken, TriggerKind, WindowDescriptor,
};
