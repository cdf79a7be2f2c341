//! Scheduler types.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};
use serde::Serialize;

use wisp_core::{SessionToken, TriggerKind, WindowDescriptor};

/// A named local time-of-day range with the hint used when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub hint: String,
}

impl TimeWindow {
    pub fn new(name: &str, start: NaiveTime, end: NaiveTime, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
            hint: hint.to_string(),
        }
    }

    /// Whether `time` falls in the window. A window whose end is before its
    /// start wraps past midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Proactive dialogue settings.
#[derive(Debug, Clone)]
pub struct ProactiveConfig {
    pub enabled: bool,
    /// Probability that a due random-interval trigger fires.
    pub probability: f64,
    /// Probability that a window change fires.
    pub window_change_probability: f64,
    /// Silence needed before a session arms, and the lower bound for random
    /// intervals and cooldowns.
    pub min_interval: Duration,
    /// Upper bound for random intervals and cooldowns.
    pub max_interval: Duration,
    /// How often triggers are evaluated.
    pub tick: std::time::Duration,
    pub window_change_enabled: bool,
    pub time_windows_enabled: bool,
    pub random_enabled: bool,
    pub time_windows: Vec<TimeWindow>,
    pub greetings: Vec<String>,
    /// Seed for the random source. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Offset used to evaluate time windows in the user's local time.
    pub utc_offset: FixedOffset,
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.3,
            window_change_probability: 0.2,
            min_interval: Duration::seconds(300),
            max_interval: Duration::seconds(900),
            tick: std::time::Duration::from_secs(5),
            window_change_enabled: true,
            time_windows_enabled: true,
            random_enabled: true,
            time_windows: vec![
                TimeWindow::new(
                    "morning",
                    at(9, 0),
                    at(9, 2),
                    "Good morning! A new day has started. Anything I can help with?",
                ),
                TimeWindow::new(
                    "noon",
                    at(12, 0),
                    at(12, 2),
                    "It's noon. Remember to take a break and grab something to eat.",
                ),
                TimeWindow::new(
                    "evening",
                    at(18, 0),
                    at(18, 2),
                    "It's evening. You've worked hard today!",
                ),
            ],
            greetings: vec![
                "Checking in. How is it going?".to_string(),
                "Been a while! Want to take a short break?".to_string(),
                "Anything I can help you with right now?".to_string(),
                "Remember to drink some water.".to_string(),
            ],
            seed: None,
            utc_offset: Utc.fix(),
        }
    }
}

/// Scheduler phase of one session.
///
/// `Fired` is transient: a firing synthesizes its turn and moves the
/// session to `Cooldown` within the same tick, so it is never observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Armed,
    Cooldown,
}

/// One proactive firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub token: SessionToken,
    /// `None` for an operator-requested turn.
    pub trigger: Option<TriggerKind>,
    pub hint: String,
    pub window: Option<WindowDescriptor>,
    pub at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

/// Session counts per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub idle: usize,
    pub armed: usize,
    pub cooldown: usize,
}

/// Scheduler status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub sessions: PhaseCounts,
    pub total_firings: u64,
    pub missed_firings: u64,
    pub manual_firings: u64,
    pub last_firing: BTreeMap<TriggerKind, DateTime<Utc>>,
    pub time_windows: usize,
    pub greetings: usize,
}
