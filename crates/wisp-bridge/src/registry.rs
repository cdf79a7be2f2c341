//! Session registry.
//!
//! Sessions live in a sharded map keyed by client token. Each session owns
//! its own state lock, so operations on one token never serialize unrelated
//! sessions. Readers outside the registry only ever see copied
//! [`SessionSnapshot`]s.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use wisp_core::{
    AuthDecision, Authorizer, Clock, ConversationHandle, OutboundChunk, SessionToken,
    WindowDescriptor,
};

use crate::BridgeError;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sessions idle longer than this are expired.
    pub idle_expiry: Duration,
    /// Capacity of each session's delivery queue, in chunks.
    pub queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::seconds(3600),
            queue_capacity: 256,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    conversation: ConversationHandle,
    created_at: DateTime<Utc>,
    last_inbound: Option<DateTime<Utc>>,
    last_outbound: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    foreground_window: Option<WindowDescriptor>,
    window_generation: u64,
    cooldown_until: Option<DateTime<Utc>>,
    next_sequence: u64,
}

/// Live server-side state for one client token.
pub struct Session {
    token: SessionToken,
    state: Mutex<SessionState>,
    outbound_tx: Mutex<Option<mpsc::Sender<OutboundChunk>>>,
    outbound_rx: Arc<AsyncMutex<mpsc::Receiver<OutboundChunk>>>,
    queue_capacity: usize,
    /// Held for the whole lifetime of a reply, from sequence assignment to
    /// the final chunk. Tokio's mutex is FIFO, so turns queue in order.
    turn_gate: Arc<AsyncMutex<()>>,
    pumps: Mutex<Vec<AbortHandle>>,
}

/// A copied view of a session, safe to hold across awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub token: SessionToken,
    pub conversation: ConversationHandle,
    pub created_at: DateTime<Utc>,
    pub last_inbound: Option<DateTime<Utc>>,
    pub last_outbound: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub foreground_window: Option<WindowDescriptor>,
    pub window_generation: u64,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub next_sequence: u64,
    pub queued_chunks: usize,
    pub reply_in_flight: bool,
}

impl SessionSnapshot {
    /// Time of the last inbound message, or session creation if none.
    pub fn silent_since(&self) -> DateTime<Utc> {
        self.last_inbound.unwrap_or(self.created_at)
    }
}

impl Session {
    fn new(token: SessionToken, now: DateTime<Utc>, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        Self {
            token,
            state: Mutex::new(SessionState {
                conversation: ConversationHandle::generate(),
                created_at: now,
                last_inbound: None,
                last_outbound: None,
                last_activity: now,
                foreground_window: None,
                window_generation: 0,
                cooldown_until: None,
                next_sequence: 1,
            }),
            outbound_tx: Mutex::new(Some(tx)),
            outbound_rx: Arc::new(AsyncMutex::new(rx)),
            queue_capacity,
            turn_gate: Arc::new(AsyncMutex::new(())),
            pumps: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn conversation(&self) -> ConversationHandle {
        self.state.lock().conversation.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let queued_chunks = self
            .outbound_tx
            .lock()
            .as_ref()
            .map(|tx| self.queue_capacity - tx.capacity())
            .unwrap_or(0);
        let reply_in_flight = self.turn_gate.try_lock().is_err();

        let state = self.state.lock();
        SessionSnapshot {
            token: self.token.clone(),
            conversation: state.conversation.clone(),
            created_at: state.created_at,
            last_inbound: state.last_inbound,
            last_outbound: state.last_outbound,
            last_activity: state.last_activity,
            foreground_window: state.foreground_window.clone(),
            window_generation: state.window_generation,
            cooldown_until: state.cooldown_until,
            next_sequence: state.next_sequence,
            queued_chunks,
            reply_in_flight,
        }
    }

    /// Idleness follows client activity only. A reply still in flight does
    /// not keep the session alive; closing it cancels the reply.
    fn is_idle(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        now - self.state.lock().last_activity >= expiry
    }

    /// Wait for this session's turn. Turns are granted in arrival order.
    pub(crate) async fn acquire_turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn_gate).lock_owned().await
    }

    /// Assign the next sequence number. Call only while holding the turn.
    pub(crate) fn assign_sequence(&self) -> u64 {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        sequence
    }

    pub(crate) fn record_inbound(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.last_inbound = Some(at);
        state.last_activity = state.last_activity.max(at);
    }

    pub(crate) fn record_outbound(&self, at: DateTime<Utc>) {
        self.state.lock().last_outbound = Some(at);
    }

    fn touch(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.last_activity = state.last_activity.max(at);
    }

    /// Sender for the delivery queue, or `None` once the session is closed.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<OutboundChunk>> {
        self.outbound_tx.lock().clone()
    }

    /// Whether the delivery queue can take at least one more chunk.
    pub(crate) fn queue_has_room(&self) -> bool {
        self.outbound_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.capacity() > 0)
    }

    pub(crate) fn receiver(&self) -> Arc<AsyncMutex<mpsc::Receiver<OutboundChunk>>> {
        Arc::clone(&self.outbound_rx)
    }

    pub(crate) fn track_pump(&self, handle: AbortHandle) {
        let mut pumps = self.pumps.lock();
        pumps.retain(|h| !h.is_finished());
        pumps.push(handle);
    }

    /// Cancel in-flight replies and discard undelivered chunks.
    pub(crate) fn close(&self) {
        self.outbound_tx.lock().take();
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        if let Ok(mut rx) = self.outbound_rx.try_lock() {
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(token = %self.token, discarded, "discarded undelivered chunks");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Result of [`SessionRegistry::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Arc<Session>,
    /// True when this call created the session.
    pub created: bool,
}

/// Maps client tokens to live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionToken, Arc<Session>>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    /// Sessions expired lazily on access, awaiting engine release.
    lapsed: Mutex<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            authorizer,
            clock,
            config,
            lapsed: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the live session for `token`, creating it on first authorized
    /// contact.
    #[tracing::instrument(skip(self, credentials), fields(token = %token))]
    pub async fn resolve(
        &self,
        token: &SessionToken,
        credentials: Option<&str>,
    ) -> Result<Resolved, BridgeError> {
        let now = self.clock.now();
        if let Some(session) = self.live(token, now) {
            return Ok(Resolved {
                session,
                created: false,
            });
        }

        if self.authorizer.authorize(token, credentials).await == AuthDecision::Denied {
            warn!(token = %token, "authorization denied");
            return Err(BridgeError::Unauthorized(token.to_string()));
        }

        let mut created = false;
        let session = {
            let entry = self.sessions.entry(token.clone()).or_insert_with(|| {
                created = true;
                Arc::new(Session::new(token.clone(), now, self.config.queue_capacity))
            });
            Arc::clone(entry.value())
        };

        if created {
            info!(token = %token, conversation = %session.conversation(), "session created");
        }
        Ok(Resolved { session, created })
    }

    /// Look up a live session without creating one.
    pub fn get(&self, token: &SessionToken) -> Option<Arc<Session>> {
        self.live(token, self.clock.now())
    }

    /// Mark the session as active so it is not expired.
    pub fn touch(&self, token: &SessionToken) -> Result<(), BridgeError> {
        let now = self.clock.now();
        let session = self
            .live(token, now)
            .ok_or_else(|| BridgeError::UnknownSession(token.to_string()))?;
        session.touch(now);
        Ok(())
    }

    /// Record the client's foreground window.
    ///
    /// Returns the session's window generation, which advances whenever the
    /// descriptor differs from the previous report.
    pub fn report_window(
        &self,
        token: &SessionToken,
        window: WindowDescriptor,
    ) -> Result<u64, BridgeError> {
        let now = self.clock.now();
        let session = self
            .live(token, now)
            .ok_or_else(|| BridgeError::UnknownSession(token.to_string()))?;

        let mut state = session.state.lock();
        state.last_activity = state.last_activity.max(now);
        if state.foreground_window.as_ref() != Some(&window) {
            debug!(token = %token, window = %window.label(), "foreground window changed");
            state.foreground_window = Some(window);
            state.window_generation += 1;
        }
        Ok(state.window_generation)
    }

    /// Set or clear the proactive cooldown deadline.
    pub fn set_cooldown_until(
        &self,
        token: &SessionToken,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), BridgeError> {
        let session = self
            .get(token)
            .ok_or_else(|| BridgeError::UnknownSession(token.to_string()))?;
        session.state.lock().cooldown_until = until;
        Ok(())
    }

    /// Copy every live session.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.iter().map(|s| s.snapshot()).collect()
    }

    /// Visit a consistent copy of each live session.
    pub fn for_each_session<F>(&self, mut f: F)
    where
        F: FnMut(&SessionSnapshot),
    {
        for snapshot in self.snapshots() {
            f(&snapshot);
        }
    }

    /// Remove a session, cancelling its in-flight replies.
    pub fn expire(&self, token: &SessionToken) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(token)?;
        session.close();
        info!(token = %token, "session removed");
        Some(session)
    }

    /// Expire every idle session. Also returns sessions expired lazily since
    /// the last sweep.
    pub fn sweep_idle(&self) -> Vec<Arc<Session>> {
        let now = self.clock.now();
        let expiry = self.config.idle_expiry;

        let idle: Vec<SessionToken> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, expiry))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = self.take_lapsed();
        for token in idle {
            if let Some((_, session)) = self
                .sessions
                .remove_if(&token, |_, s| s.is_idle(now, expiry))
            {
                session.close();
                info!(token = %token, "idle session expired");
                expired.push(session);
            }
        }
        expired
    }

    /// Take sessions that were expired lazily on access.
    pub fn take_lapsed(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut *self.lapsed.lock())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fetch a session, expiring it first if it has been idle too long.
    fn live(&self, token: &SessionToken, now: DateTime<Utc>) -> Option<Arc<Session>> {
        let session = self.sessions.get(token).map(|e| Arc::clone(e.value()))?;
        let expiry = self.config.idle_expiry;
        if !session.is_idle(now, expiry) {
            return Some(session);
        }

        if let Some((_, lapsed)) = self.sessions.remove_if(token, |_, s| s.is_idle(now, expiry)) {
            lapsed.close();
            info!(token = %token, "idle session expired on access");
            self.lapsed.lock().push(lapsed);
        }
        None
    }
}
