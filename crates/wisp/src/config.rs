//! Configuration file loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Local, NaiveTime, Offset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wisp_bridge::{BridgeConfig, RegistryConfig};
use wisp_scheduler::{ProactiveConfig, TimeWindow};
use wisp_screenshots::{RetentionPolicy, ScreenshotConfig};

const TIME_FORMAT: &str = "%H:%M";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

fn invalid(key: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.into(),
        reason: reason.into(),
    }
}

/// A time-of-day greeting window as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowConfig {
    pub name: String,
    /// `HH:MM`, local time.
    pub start: String,
    /// `HH:MM`, local time.
    pub end: String,
    pub hint: String,
}

/// Daemon configuration. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub screenshot_interval_seconds: u64,
    pub screenshot_max_count: usize,
    pub screenshot_max_age_seconds: u64,
    pub screenshot_enabled: bool,
    /// External command that writes a screenshot to stdout. Without one,
    /// screenshots come from client desktop state reports.
    pub screenshot_command: Option<Vec<String>>,

    pub proactive_enabled: bool,
    pub proactive_window_change_enabled: bool,
    pub proactive_time_windows_enabled: bool,
    pub proactive_random_enabled: bool,
    pub proactive_probability: f64,
    pub proactive_window_change_probability: f64,
    pub proactive_min_interval_seconds: u64,
    pub proactive_max_interval_seconds: u64,
    pub proactive_tick_seconds: u64,
    pub proactive_time_windows: Vec<TimeWindowConfig>,
    pub proactive_greetings: Vec<String>,
    pub proactive_seed: Option<u64>,
    /// Offset of the user's local time from UTC. Defaults to the host's.
    pub proactive_utc_offset_minutes: Option<i32>,

    pub session_idle_expiry_seconds: u64,
    pub session_sweep_seconds: u64,
    pub outbound_queue_capacity: usize,
    pub max_payload_bytes: u64,
    pub engine_max_attempts: u32,
    pub engine_retry_initial_millis: u64,
    /// Uploaded attachments older than this are deleted by the sweep.
    pub upload_max_age_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        let proactive = ProactiveConfig::default();
        let screenshots = ScreenshotConfig::default();
        let registry = RegistryConfig::default();
        let bridge = BridgeConfig::default();

        Self {
            screenshot_interval_seconds: screenshots.interval.as_secs(),
            screenshot_max_count: screenshots.retention.max_count,
            screenshot_max_age_seconds: screenshots.retention.max_age.num_seconds().max(0) as u64,
            screenshot_enabled: screenshots.monitoring,
            screenshot_command: None,

            proactive_enabled: proactive.enabled,
            proactive_window_change_enabled: proactive.window_change_enabled,
            proactive_time_windows_enabled: proactive.time_windows_enabled,
            proactive_random_enabled: proactive.random_enabled,
            proactive_probability: proactive.probability,
            proactive_window_change_probability: proactive.window_change_probability,
            proactive_min_interval_seconds: proactive.min_interval.num_seconds().max(0) as u64,
            proactive_max_interval_seconds: proactive.max_interval.num_seconds().max(0) as u64,
            proactive_tick_seconds: proactive.tick.as_secs(),
            proactive_time_windows: proactive
                .time_windows
                .iter()
                .map(|w| TimeWindowConfig {
                    name: w.name.clone(),
                    start: w.start.format(TIME_FORMAT).to_string(),
                    end: w.end.format(TIME_FORMAT).to_string(),
                    hint: w.hint.clone(),
                })
                .collect(),
            proactive_greetings: proactive.greetings,
            proactive_seed: None,
            proactive_utc_offset_minutes: None,

            session_idle_expiry_seconds: registry.idle_expiry.num_seconds().max(0) as u64,
            session_sweep_seconds: 60,
            outbound_queue_capacity: registry.queue_capacity,
            max_payload_bytes: bridge.max_payload_bytes,
            engine_max_attempts: bridge.engine_max_attempts,
            engine_retry_initial_millis: bridge.engine_retry_initial.as_millis() as u64,
            upload_max_age_seconds: 86_400,
        }
    }
}

impl Config {
    /// Load and validate the config file at `path`, or the defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("proactiveProbability", self.proactive_probability),
            (
                "proactiveWindowChangeProbability",
                self.proactive_window_change_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} is outside [0, 1]")));
            }
        }
        if self.proactive_min_interval_seconds > self.proactive_max_interval_seconds {
            return Err(invalid(
                "proactiveMinIntervalSeconds",
                format!(
                    "{} exceeds proactiveMaxIntervalSeconds ({})",
                    self.proactive_min_interval_seconds, self.proactive_max_interval_seconds
                ),
            ));
        }
        for (key, value) in [
            ("screenshotIntervalSeconds", self.screenshot_interval_seconds),
            ("screenshotMaxCount", self.screenshot_max_count as u64),
            ("outboundQueueCapacity", self.outbound_queue_capacity as u64),
            ("engineMaxAttempts", u64::from(self.engine_max_attempts)),
            ("proactiveTickSeconds", self.proactive_tick_seconds),
            ("sessionSweepSeconds", self.session_sweep_seconds),
            ("uploadMaxAgeSeconds", self.upload_max_age_seconds),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self
            .screenshot_command
            .as_ref()
            .is_some_and(|command| command.is_empty())
        {
            return Err(invalid("screenshotCommand", "must name a program"));
        }
        self.time_windows()?;
        self.utc_offset()?;
        Ok(())
    }

    fn time_windows(&self) -> Result<Vec<TimeWindow>, ConfigError> {
        self.proactive_time_windows
            .iter()
            .enumerate()
            .map(|(i, window)| {
                let parse = |field: &str, raw: &str| {
                    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|_| {
                        invalid(
                            format!("proactiveTimeWindows[{i}].{field}"),
                            format!("expected HH:MM, got {raw:?}"),
                        )
                    })
                };
                Ok(TimeWindow::new(
                    &window.name,
                    parse("start", &window.start)?,
                    parse("end", &window.end)?,
                    &window.hint,
                ))
            })
            .collect()
    }

    fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        match self.proactive_utc_offset_minutes {
            Some(minutes) => FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                invalid(
                    "proactiveUtcOffsetMinutes",
                    format!("{minutes} is not a valid offset"),
                )
            }),
            None => Ok(Local::now().offset().fix()),
        }
    }

    pub fn proactive(&self) -> Result<ProactiveConfig, ConfigError> {
        Ok(ProactiveConfig {
            enabled: self.proactive_enabled,
            probability: self.proactive_probability,
            window_change_probability: self.proactive_window_change_probability,
            min_interval: chrono::Duration::seconds(self.proactive_min_interval_seconds as i64),
            max_interval: chrono::Duration::seconds(self.proactive_max_interval_seconds as i64),
            tick: Duration::from_secs(self.proactive_tick_seconds),
            window_change_enabled: self.proactive_window_change_enabled,
            time_windows_enabled: self.proactive_time_windows_enabled,
            random_enabled: self.proactive_random_enabled,
            time_windows: self.time_windows()?,
            greetings: self.proactive_greetings.clone(),
            seed: self.proactive_seed,
            utc_offset: self.utc_offset()?,
        })
    }

    pub fn screenshots(&self) -> ScreenshotConfig {
        ScreenshotConfig {
            interval: Duration::from_secs(self.screenshot_interval_seconds),
            retention: RetentionPolicy::new(
                self.screenshot_max_count,
                chrono::Duration::seconds(self.screenshot_max_age_seconds as i64),
            ),
            monitoring: self.screenshot_enabled,
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            idle_expiry: chrono::Duration::seconds(self.session_idle_expiry_seconds as i64),
            queue_capacity: self.outbound_queue_capacity,
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            max_payload_bytes: self.max_payload_bytes,
            engine_max_attempts: self.engine_max_attempts,
            engine_retry_initial: Duration::from_millis(self.engine_retry_initial_millis),
            ..BridgeConfig::default()
        }
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_seconds)
    }

    pub fn upload_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.upload_max_age_seconds as i64)
    }
}
