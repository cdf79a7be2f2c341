//! Message bridge: inbound sequencing, engine invocation, streamed delivery.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc, oneshot};
use tracing::{Instrument, debug, error, info, warn};

use wisp_core::{
    Clock, ConversationEngine, ConversationHandle, Direction, InboundMessage, Message,
    MessageBody, OutboundChunk, ReplyStream, SessionToken,
};

use crate::registry::Session;
use crate::{BridgeError, SessionRegistry};

/// Bridge tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Largest inbound payload accepted, in bytes.
    pub max_payload_bytes: u64,
    /// Engine attempts per turn before the turn fails.
    pub engine_max_attempts: u32,
    /// First retry delay.
    pub engine_retry_initial: Duration,
    /// Retry delay ceiling.
    pub engine_retry_max: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 10 * 1024 * 1024,
            engine_max_attempts: 3,
            engine_retry_initial: Duration::from_millis(250),
            engine_retry_max: Duration::from_secs(5),
        }
    }
}

/// Outcome of a successful [`MessageBridge::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceptance {
    pub accepted: bool,
    /// Sequence number assigned to the turn. Every chunk of its reply
    /// carries the same number.
    pub sequence: u64,
}

/// Routes inbound messages to the conversation engine and streams the
/// replies back onto each session's delivery queue.
pub struct MessageBridge {
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn ConversationEngine>,
    config: BridgeConfig,
}

impl MessageBridge {
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn ConversationEngine>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept an inbound message and start streaming the engine's reply.
    ///
    /// Returns once the engine has produced its first chunk (or finished an
    /// empty reply). The rest of the reply is pumped onto the delivery queue
    /// in the background. Turns for one session run strictly one after
    /// another in arrival order. Once a sequence is assigned its turn runs
    /// to a final chunk even if the caller stops waiting.
    #[tracing::instrument(
        skip(self, message),
        fields(token = %message.token, kind = %message.body.kind(), origin = message.origin.label())
    )]
    pub async fn ingest(&self, message: InboundMessage) -> Result<Acceptance, BridgeError> {
        validate(&message, self.config.max_payload_bytes)?;

        let resolved = self
            .registry
            .resolve(&message.token, message.credentials.as_deref())
            .await?;
        self.release_lapsed().await;
        let session = resolved.session;

        if !message.origin.is_system() {
            session.record_inbound(message.received_at);
        }

        if !session.queue_has_room() {
            warn!(token = %message.token, "delivery queue full, rejecting turn");
            return Err(BridgeError::QueueFull(message.token.to_string()));
        }

        let turn = session.acquire_turn().await;
        let Some(tx) = session.sender() else {
            return Err(BridgeError::UnknownSession(message.token.to_string()));
        };
        // The previous reply may have filled the queue while we waited.
        if tx.capacity() == 0 {
            warn!(token = %message.token, "delivery queue full, rejecting turn");
            return Err(BridgeError::QueueFull(message.token.to_string()));
        }

        let sequence = session.assign_sequence();
        let inbound = Message::new(
            message.token.clone(),
            Direction::Inbound,
            message.origin,
            sequence,
            message.body,
            message.received_at,
        );
        let conversation = session.conversation();

        // From here the turn belongs to its own task, so a caller that stops
        // waiting cannot leave the assigned sequence undelivered.
        let (started_tx, started_rx) = oneshot::channel();
        let pump = ReplyPump {
            session: Arc::clone(&session),
            tx,
            clock: Arc::clone(self.registry.clock()),
            inbound,
        };
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let handle = tokio::spawn(
            async move {
                match start_reply(engine.as_ref(), &config, &conversation, &pump.inbound).await {
                    Ok((first, reply)) => {
                        let _ = started_tx.send(Ok(()));
                        pump.run(turn, first, reply).await;
                    }
                    Err(err) => {
                        error!(sequence, error = %err, "terminal delivery failure");
                        pump.deliver(MessageBody::text(err.to_string()), 0, true, Some(err.to_string()))
                            .await;
                        drop(turn);
                        let _ = started_tx.send(Err(err));
                    }
                }
            }
            .in_current_span(),
        );
        session.track_pump(handle.abort_handle());
        if session.sender().is_none() {
            // Disconnected while waiting for the turn.
            handle.abort();
        }

        match started_rx.await {
            Ok(Ok(())) => {
                debug!(sequence, "turn accepted");
                Ok(Acceptance {
                    accepted: true,
                    sequence,
                })
            }
            Ok(Err(err)) => Err(err),
            // The session closed before the engine started.
            Err(_) => Err(BridgeError::UnknownSession(message.token.to_string())),
        }
    }

    /// Stream the queued chunks of the next reply for `token`.
    ///
    /// The stream ends after the reply's final chunk. Chunks are removed from
    /// the queue as they are yielded, so a later call resumes with the next
    /// undelivered chunk.
    pub fn drain_outbound(
        &self,
        token: &SessionToken,
    ) -> Result<BoxStream<'static, OutboundChunk>, BridgeError> {
        let session = self
            .registry
            .get(token)
            .ok_or_else(|| BridgeError::UnknownSession(token.to_string()))?;
        Ok(drain_reply(session.receiver()))
    }

    /// Tear down a session: cancel in-flight replies, discard queued chunks
    /// and release the engine turn.
    #[tracing::instrument(skip(self), fields(token = %token))]
    pub async fn disconnect(&self, token: &SessionToken) -> Result<(), BridgeError> {
        let session = self
            .registry
            .expire(token)
            .ok_or_else(|| BridgeError::UnknownSession(token.to_string()))?;
        self.engine.release(&session.conversation()).await;
        info!(token = %token, "session disconnected");
        Ok(())
    }

    /// Disconnect every session.
    pub async fn disconnect_all(&self) -> usize {
        let mut count = 0;
        for snapshot in self.registry.snapshots() {
            if self.disconnect(&snapshot.token).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Expire idle sessions and release their engine turns.
    pub async fn sweep_sessions(&self) -> usize {
        let expired = self.registry.sweep_idle();
        let count = expired.len();
        for session in expired {
            self.engine.release(&session.conversation()).await;
        }
        if count > 0 {
            info!(count, "expired idle sessions");
        }
        count
    }

    async fn release_lapsed(&self) {
        for session in self.registry.take_lapsed() {
            self.engine.release(&session.conversation()).await;
        }
    }
}

fn validate(message: &InboundMessage, limit: u64) -> Result<(), BridgeError> {
    let size = message.body.payload_size();
    if size > limit {
        return Err(BridgeError::PayloadTooLarge { size, limit });
    }
    match &message.body {
        MessageBody::Text { text } if text.trim().is_empty() => Err(BridgeError::SessionDenied(
            "text message is empty".to_string(),
        )),
        MessageBody::File { filename, .. } if filename.trim().is_empty() => Err(
            BridgeError::SessionDenied("file message has no filename".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Invoke the engine until it yields a first chunk, with bounded
/// exponential backoff between attempts.
async fn start_reply(
    engine: &dyn ConversationEngine,
    config: &BridgeConfig,
    conversation: &ConversationHandle,
    message: &Message,
) -> Result<(Option<MessageBody>, ReplyStream), BridgeError> {
    let max_attempts = config.engine_max_attempts.max(1);
    let mut backoff = ExponentialBackoff {
        initial_interval: config.engine_retry_initial,
        max_interval: config.engine_retry_max,
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let failure = match engine.respond(conversation, message).await {
            Ok(mut reply) => match reply.next().await {
                Some(Ok(first)) => return Ok((Some(first), reply)),
                None => return Ok((None, reply)),
                Some(Err(e)) => e,
            },
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(BridgeError::EngineUnavailable {
                attempts: attempt,
                message: failure.to_string(),
            });
        }

        let delay = backoff.next_backoff().unwrap_or(config.engine_retry_max);
        warn!(
            attempt,
            max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %failure,
            "engine attempt failed"
        );
        tokio::time::sleep(delay).await;
    }
}

fn outbound_chunk(
    inbound: &Message,
    body: MessageBody,
    index: u32,
    is_final: bool,
    failure: Option<String>,
    now: chrono::DateTime<chrono::Utc>,
) -> OutboundChunk {
    OutboundChunk {
        message: Message::new(
            inbound.token().clone(),
            Direction::Outbound,
            inbound.origin().clone(),
            inbound.sequence(),
            body,
            now,
        ),
        index,
        is_final,
        failure,
    }
}

/// Background task that moves one reply onto the delivery queue.
struct ReplyPump {
    session: Arc<Session>,
    tx: mpsc::Sender<OutboundChunk>,
    clock: Arc<dyn Clock>,
    inbound: Message,
}

impl ReplyPump {
    /// Holds the session's turn until the final chunk is queued. One chunk
    /// of lookahead lets the last chunk carry `is_final`.
    async fn run(self, _turn: OwnedMutexGuard<()>, first: Option<MessageBody>, mut reply: ReplyStream) {
        let sequence = self.inbound.sequence();
        let Some(mut current) = first else {
            self.deliver(MessageBody::text(""), 0, true, None).await;
            debug!(sequence, "empty reply delivered");
            return;
        };

        let mut index = 0u32;
        loop {
            match reply.next().await {
                Some(Ok(next)) => {
                    if !self.deliver(current, index, false, None).await {
                        return;
                    }
                    current = next;
                    index += 1;
                }
                None => {
                    self.deliver(current, index, true, None).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!(token = %self.session.token(), sequence, error = %e, "reply stream failed");
                    if self.deliver(current, index, false, None).await {
                        self.deliver(MessageBody::text(e.to_string()), index + 1, true, Some(e.to_string()))
                            .await;
                    }
                    break;
                }
            }
        }
        debug!(sequence, chunks = index + 1, "reply delivered");
    }

    async fn deliver(&self, body: MessageBody, index: u32, is_final: bool, failure: Option<String>) -> bool {
        let chunk = outbound_chunk(&self.inbound, body, index, is_final, failure, self.clock.now());
        if self.tx.send(chunk).await.is_err() {
            return false;
        }
        self.session.record_outbound(self.clock.now());
        true
    }
}

enum DrainState {
    Waiting(Arc<AsyncMutex<mpsc::Receiver<OutboundChunk>>>),
    Holding(OwnedMutexGuard<mpsc::Receiver<OutboundChunk>>),
    Done,
}

/// Yield chunks up to and including the next final chunk. The receiver is
/// held for the whole reply so concurrent drains never split one reply.
fn drain_reply(
    rx: Arc<AsyncMutex<mpsc::Receiver<OutboundChunk>>>,
) -> BoxStream<'static, OutboundChunk> {
    stream::unfold(DrainState::Waiting(rx), |state| async move {
        let mut guard = match state {
            DrainState::Waiting(rx) => rx.lock_owned().await,
            DrainState::Holding(guard) => guard,
            DrainState::Done => return None,
        };
        let chunk = guard.recv().await?;
        let next = if chunk.is_final {
            DrainState::Done
        } else {
            DrainState::Holding(guard)
        };
        Some((chunk, next))
    })
    .boxed()
}
