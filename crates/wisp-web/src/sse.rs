//! Server-Sent Events for reply delivery.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tracing::{debug, warn};

use wisp_bridge::MessageBridge;
use wisp_core::{OutboundChunk, SessionToken};

use crate::wire::OutboundFrame;

struct Cursor {
    bridge: Arc<MessageBridge>,
    token: SessionToken,
    reply: Option<BoxStream<'static, OutboundChunk>>,
    /// Whether the last chunk seen closed its reply.
    at_boundary: bool,
}

/// Create an SSE stream that drains `token`'s replies one after another.
///
/// Each chunk leaves the delivery queue as it is sent, so a reconnecting
/// client resumes with the next undelivered chunk. The stream ends when the
/// session goes away.
pub fn create_reply_stream(
    bridge: Arc<MessageBridge>,
    token: SessionToken,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let cursor = Cursor {
        bridge,
        token,
        reply: None,
        at_boundary: true,
    };

    let chunks = stream::unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(reply) = cursor.reply.as_mut() {
                match reply.next().await {
                    Some(chunk) => {
                        cursor.at_boundary = chunk.is_final;
                        return Some((chunk, cursor));
                    }
                    // Queue closed mid-reply: the session was torn down.
                    None if !cursor.at_boundary => return None,
                    None => cursor.reply = None,
                }
            }
            match cursor.bridge.drain_outbound(&cursor.token) {
                Ok(reply) => cursor.reply = Some(reply),
                Err(e) => {
                    debug!(token = %cursor.token, error = %e, "reply stream closed");
                    return None;
                }
            }
        }
    });

    let events = chunks.map(|chunk| Ok(to_event(&chunk)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(chunk: &OutboundChunk) -> Event {
    let frame = OutboundFrame::from(chunk);
    let id = format!("{}:{}", frame.sequence, frame.index);
    match Event::default().id(id).json_data(&frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(sequence = frame.sequence, error = %e, "failed to encode frame");
            Event::default().event("error").data("frame encoding failed")
        }
    }
}
