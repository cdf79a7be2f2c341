//! Session registry and streaming message bridge for Wisp.
//!
//! This crate provides:
//! - A session registry with per-token locking and idle expiry
//! - The message bridge that sequences inbound turns, invokes the
//!   conversation engine with bounded retries, and streams replies onto a
//!   bounded per-session delivery queue
//! - Authorizers for first-contact credential checks

mod auth;
mod bridge;
mod error;
mod registry;

pub use auth::{AllowAll, SharedSecret};
pub use bridge::{Acceptance, BridgeConfig, MessageBridge};
pub use error::BridgeError;
pub use registry::{RegistryConfig, Resolved, Session, SessionRegistry, SessionSnapshot};
