//! Proactive dialogue scheduler implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use wisp_bridge::{MessageBridge, SessionSnapshot};
use wisp_core::{InboundMessage, MessageBody, ProactiveContext, SessionToken, TriggerKind};
use wisp_screenshots::ScreenshotStore;

use crate::{Firing, Phase, PhaseCounts, ProactiveConfig, SchedulerError, SchedulerStatus};

/// Per-session trigger state.
#[derive(Debug, Clone, Default)]
struct Tracker {
    phase: Phase,
    /// Window generation already accounted for. Changes seen while idle or
    /// cooling down are absorbed here and never fire later.
    window_baseline: u64,
    random_due_at: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    /// Local date each time window last fired.
    windows_fired_on: HashMap<String, NaiveDate>,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    missed: AtomicU64,
    manual: AtomicU64,
}

/// Decides when to start a conversation turn on the user's behalf.
pub struct ProactiveScheduler {
    bridge: Arc<MessageBridge>,
    screenshots: Option<Arc<ScreenshotStore>>,
    config: ProactiveConfig,
    enabled: AtomicBool,
    rng: Mutex<StdRng>,
    trackers: DashMap<SessionToken, Tracker>,
    counters: Arc<Counters>,
    last_firing: Mutex<BTreeMap<TriggerKind, DateTime<Utc>>>,
}

impl ProactiveScheduler {
    pub fn new(
        bridge: Arc<MessageBridge>,
        screenshots: Option<Arc<ScreenshotStore>>,
        config: ProactiveConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            bridge,
            screenshots,
            enabled: AtomicBool::new(config.enabled),
            config,
            rng: Mutex::new(rng),
            trackers: DashMap::new(),
            counters: Arc::new(Counters::default()),
            last_firing: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turn proactive dialogue on or off. Turning it off returns every
    /// session to `Idle` and clears cooldowns.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if !enabled {
            let registry = self.bridge.registry();
            for mut entry in self.trackers.iter_mut() {
                let tracker = entry.value_mut();
                tracker.phase = Phase::Idle;
                tracker.random_due_at = None;
                tracker.cooldown_until = None;
                let _ = registry.set_cooldown_until(entry.key(), None);
            }
        }
        if was != enabled {
            info!(enabled, "proactive dialogue toggled");
        }
    }

    /// Current phase of a session, if the scheduler has seen it.
    pub fn phase(&self, token: &SessionToken) -> Option<Phase> {
        self.trackers.get(token).map(|t| t.phase)
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut sessions = PhaseCounts::default();
        for entry in self.trackers.iter() {
            match entry.phase {
                Phase::Idle => sessions.idle += 1,
                Phase::Armed => sessions.armed += 1,
                Phase::Cooldown => sessions.cooldown += 1,
            }
        }
        SchedulerStatus {
            enabled: self.is_enabled(),
            sessions,
            total_firings: self.counters.total.load(Ordering::Relaxed),
            missed_firings: self.counters.missed.load(Ordering::Relaxed),
            manual_firings: self.counters.manual.load(Ordering::Relaxed),
            last_firing: self.last_firing.lock().clone(),
            time_windows: self.config.time_windows.len(),
            greetings: self.config.greetings.len(),
        }
    }

    /// Evaluate every session once and dispatch any firings.
    ///
    /// Each session fires at most once per tick.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<Firing> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let mut snapshots = self.bridge.registry().snapshots();
        // Stable order keeps seeded draws reproducible.
        snapshots.sort_by(|a, b| a.token.cmp(&b.token));
        self.trackers
            .retain(|token, _| snapshots.iter().any(|s| &s.token == token));

        let firings: Vec<Firing> = snapshots
            .iter()
            .filter_map(|snapshot| self.evaluate(snapshot, now))
            .collect();

        for firing in &firings {
            self.dispatch(firing.clone()).await;
        }
        firings
    }

    /// Fire a proactive turn for `token` right now, skipping trigger
    /// evaluation. The session still enters cooldown.
    #[tracing::instrument(skip(self), fields(token = %token))]
    pub async fn trigger_now(&self, token: &SessionToken) -> Result<Firing, SchedulerError> {
        if !self.is_enabled() {
            return Err(SchedulerError::Disabled);
        }
        let session = self
            .bridge
            .registry()
            .get(token)
            .ok_or_else(|| SchedulerError::UnknownSession(token.to_string()))?;
        let snapshot = session.snapshot();
        let now = self.bridge.registry().clock().now();

        let hint = self.pick_greeting();
        let cooldown_until = now + self.draw_interval();
        {
            let mut tracker = self.trackers.entry(token.clone()).or_default();
            tracker.phase = Phase::Cooldown;
            tracker.window_baseline = snapshot.window_generation;
            tracker.random_due_at = None;
            tracker.cooldown_until = Some(cooldown_until);
        }
        self.bridge
            .registry()
            .set_cooldown_until(token, Some(cooldown_until))?;

        let firing = Firing {
            token: token.clone(),
            trigger: None,
            hint,
            window: snapshot.foreground_window,
            at: now,
            cooldown_until,
        };
        self.counters.manual.fetch_add(1, Ordering::Relaxed);
        self.dispatch(firing.clone()).await;
        Ok(firing)
    }

    /// Run the tick loop until shutdown.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            tick_secs = self.config.tick.as_secs(),
            enabled = self.is_enabled(),
            "proactive scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("proactive scheduler received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let now = self.bridge.registry().clock().now();
                    let firings = self.tick_at(now).await;
                    if !firings.is_empty() {
                        debug!(count = firings.len(), "proactive tick fired");
                    }
                }
            }
        }

        info!("proactive scheduler shut down");
    }

    /// Advance one session's state machine.
    fn evaluate(&self, snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Option<Firing> {
        let mut entry = self
            .trackers
            .entry(snapshot.token.clone())
            .or_insert_with(|| Tracker {
                window_baseline: snapshot.window_generation,
                ..Tracker::default()
            });
        let tracker = entry.value_mut();
        let silent_for = now - snapshot.silent_since();

        if tracker.phase == Phase::Cooldown {
            tracker.window_baseline = snapshot.window_generation;
            if tracker.cooldown_until.is_some_and(|until| now < until) {
                return None;
            }
            tracker.phase = Phase::Idle;
            tracker.cooldown_until = None;
            let _ = self
                .bridge
                .registry()
                .set_cooldown_until(&snapshot.token, None);
            debug!(token = %snapshot.token, "cooldown elapsed");
        }

        if tracker.phase == Phase::Idle {
            tracker.window_baseline = snapshot.window_generation;
            if silent_for < self.config.min_interval {
                return None;
            }
            tracker.phase = Phase::Armed;
            tracker.random_due_at = Some(now + self.draw_interval());
            debug!(token = %snapshot.token, "session armed");
        } else if silent_for < self.config.min_interval {
            // The user spoke since arming.
            tracker.phase = Phase::Idle;
            tracker.random_due_at = None;
            tracker.window_baseline = snapshot.window_generation;
            debug!(token = %snapshot.token, "session disarmed by activity");
            return None;
        }

        let (trigger, hint) = self.match_trigger(tracker, snapshot, now)?;

        let cooldown_until = now + self.draw_interval();
        tracker.phase = Phase::Cooldown;
        tracker.cooldown_until = Some(cooldown_until);
        tracker.random_due_at = None;
        drop(entry);

        let _ = self
            .bridge
            .registry()
            .set_cooldown_until(&snapshot.token, Some(cooldown_until));

        info!(
            token = %snapshot.token,
            trigger = %trigger,
            cooldown_until = %cooldown_until,
            "proactive trigger fired"
        );
        Some(Firing {
            token: snapshot.token.clone(),
            trigger: Some(trigger),
            hint,
            window: snapshot.foreground_window.clone(),
            at: now,
            cooldown_until,
        })
    }

    /// First matching trigger in priority order.
    fn match_trigger(
        &self,
        tracker: &mut Tracker,
        snapshot: &SessionSnapshot,
        now: DateTime<Utc>,
    ) -> Option<(TriggerKind, String)> {
        if self.config.window_change_enabled && snapshot.window_generation != tracker.window_baseline
        {
            tracker.window_baseline = snapshot.window_generation;
            if self.draw(self.config.window_change_probability) {
                let label = snapshot
                    .foreground_window
                    .as_ref()
                    .map(|w| w.label().to_string())
                    .unwrap_or_else(|| "another window".to_string());
                return Some((
                    TriggerKind::WindowChange,
                    format!("The user just switched to {label}."),
                ));
            }
            debug!(token = %snapshot.token, "window change draw missed");
        }

        if self.config.time_windows_enabled {
            let local = now.with_timezone(&self.config.utc_offset);
            let today = local.date_naive();
            for window in &self.config.time_windows {
                if !window.contains(local.time()) {
                    continue;
                }
                if tracker.windows_fired_on.get(&window.name) == Some(&today) {
                    continue;
                }
                tracker.windows_fired_on.insert(window.name.clone(), today);
                return Some((TriggerKind::TimeWindow, window.hint.clone()));
            }
        }

        if self.config.random_enabled && tracker.random_due_at.is_some_and(|due| now >= due) {
            if self.draw(self.config.probability) {
                return Some((TriggerKind::RandomInterval, self.pick_greeting()));
            }
            tracker.random_due_at = Some(now + self.draw_interval());
            debug!(token = %snapshot.token, "random draw missed, rescheduled");
        }

        None
    }

    /// Hand a firing to the bridge as a system-origin turn.
    ///
    /// Delivery happens in the background; a failed turn is logged and not
    /// retried, since the session is already cooling down.
    async fn dispatch(&self, firing: Firing) {
        let screenshot = match &self.screenshots {
            Some(store) => store.latest(1).await.into_iter().next().map(|r| r.blob),
            None => None,
        };

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if let Some(kind) = firing.trigger {
            self.last_firing.lock().insert(kind, firing.at);
        }

        let context = ProactiveContext {
            trigger: firing.trigger,
            hint: firing.hint.clone(),
            window: firing.window,
            screenshot,
        };
        let message = InboundMessage::system(
            firing.token.clone(),
            context,
            MessageBody::text(firing.hint),
            firing.at,
        );

        let bridge = Arc::clone(&self.bridge);
        let counters = Arc::clone(&self.counters);
        let token = firing.token;
        tokio::spawn(async move {
            match bridge.ingest(message).await {
                Ok(acceptance) => {
                    debug!(token = %token, sequence = acceptance.sequence, "proactive turn accepted");
                }
                Err(e) => {
                    counters.missed.fetch_add(1, Ordering::Relaxed);
                    warn!(token = %token, error = %e, "missed proactive firing");
                }
            }
        });
    }

    fn draw(&self, probability: f64) -> bool {
        self.rng.lock().gen_bool(probability.clamp(0.0, 1.0))
    }

    /// Uniform draw from `[min_interval, max_interval]`, in whole seconds.
    fn draw_interval(&self) -> Duration {
        let min = self.config.min_interval.num_seconds();
        let max = self.config.max_interval.num_seconds();
        if max <= min {
            return Duration::seconds(min);
        }
        Duration::seconds(self.rng.lock().gen_range(min..=max))
    }

    fn pick_greeting(&self) -> String {
        self.config
            .greetings
            .choose(&mut *self.rng.lock())
            .cloned()
            .unwrap_or_else(|| "Checking in.".to_string())
    }
}
