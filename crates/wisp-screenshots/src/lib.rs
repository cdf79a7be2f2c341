//! Bounded desktop screenshot cache for Wisp.
//!
//! This crate provides:
//! - A screenshot store that captures on a fixed cadence through a pluggable
//!   capture source and keeps bytes in a blob store
//! - A pure retention policy bounding the cache by count and age
//! - Capture sources for client-pushed frames and external commands

mod capture;
mod error;
mod retention;
mod store;

pub use capture::{CommandCapture, PushedFrameCapture};
pub use error::ScreenshotError;
pub use retention::{RetentionPolicy, ScreenshotRecord};
pub use store::{ScreenshotConfig, ScreenshotStats, ScreenshotStore, SweepReport};
