//! HTTP gateway for Wisp.
//!
//! This crate provides:
//! - JSON endpoints for inbound messages, desktop-state reports and heartbeats
//! - A server-sent events stream of reply chunks per session
//! - Operator endpoints for proactive dialogue and the screenshot cache
//! - Blob download for image, audio and file payloads

mod error;
mod routes;
mod sse;
mod wire;

pub use error::WebError;
pub use routes::{AppState, create_router};
pub use wire::{DesktopStateRequest, InboundRequest, OutboundFrame};
