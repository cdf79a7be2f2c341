//! Proactive dialogue scheduler for Wisp.
//!
//! This crate provides:
//! - A per-session Idle, Armed, Fired, Cooldown state machine
//! - Window-change, time-of-day and randomized triggers evaluated in a
//!   fixed priority order
//! - Seedable randomness so firing behavior is reproducible in tests
//! - Synthetic system-origin turns handed to the message bridge

mod error;
mod scheduler;
mod types;

pub use error::SchedulerError;
pub use scheduler::ProactiveScheduler;
pub use types::{Firing, Phase, PhaseCounts, ProactiveConfig, SchedulerStatus, TimeWindow};
