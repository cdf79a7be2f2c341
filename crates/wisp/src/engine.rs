//! Conversation engines the daemon can drive.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wisp_core::{
    ConversationEngine, ConversationHandle, EngineError, Message, MessageBody, Origin, ReplyStream,
};

/// Request body sent to the remote engine.
#[derive(Debug, Serialize)]
struct RespondRequest<'a> {
    conversation: &'a str,
    message: &'a Message,
    origin: &'a Origin,
}

#[derive(Debug, Serialize)]
struct ReleaseRequest<'a> {
    conversation: &'a str,
}

/// One line of the newline-delimited JSON reply.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyLine {
    Text { text: String },
    Error { message: String },
}

/// Drives a remote engine over HTTP.
///
/// `POST {base}/respond` answers with newline-delimited JSON, one
/// `{"type":"text","text":...}` object per chunk. An `{"type":"error"}` line
/// fails the reply. `POST {base}/release` cancels a conversation's turn.
pub struct HttpEngine {
    http: Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        // Replies stream for as long as the model talks, so only the
        // connect phase is bounded.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ConversationEngine for HttpEngine {
    async fn respond(
        &self,
        conversation: &ConversationHandle,
        message: &Message,
    ) -> Result<ReplyStream, EngineError> {
        let url = format!("{}/respond", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&RespondRequest {
                conversation: conversation.as_str(),
                message,
                origin: message.origin(),
            })
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Unavailable(format!(
                "engine returned {status}: {}",
                body.trim()
            )));
        }

        debug!(conversation = %conversation, "engine reply started");
        Ok(reply_lines(response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed()))
    }

    async fn release(&self, conversation: &ConversationHandle) {
        let url = format!("{}/release", self.base_url);
        let result = self
            .http
            .post(&url)
            .json(&ReleaseRequest {
                conversation: conversation.as_str(),
            })
            .send()
            .await;
        if let Err(e) = result {
            warn!(conversation = %conversation, error = %e, "failed to release conversation");
        }
    }
}

struct LineReader {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    done: bool,
}

impl LineReader {
    fn next_line(&mut self) -> Option<String> {
        let line: Vec<u8> = match self.buffer.iter().position(|b| *b == b'\n') {
            Some(pos) => self.buffer.drain(..=pos).collect(),
            None if self.done && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
            None => return None,
        };
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

fn reply_lines(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> ReplyStream {
    let reader = LineReader {
        bytes,
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.next_line() {
                if line.is_empty() {
                    continue;
                }
                return Some((parse_line(&line), reader));
            }
            if reader.done {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(bytes)) => reader.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buffer.clear();
                    return Some((Err(EngineError::Stream(e.to_string())), reader));
                }
                None => reader.done = true,
            }
        }
    })
    .boxed()
}

fn parse_line(line: &str) -> Result<MessageBody, EngineError> {
    match serde_json::from_str::<ReplyLine>(line) {
        Ok(ReplyLine::Text { text }) => Ok(MessageBody::text(text)),
        Ok(ReplyLine::Error { message }) => Err(EngineError::Stream(message)),
        Err(e) => Err(EngineError::Stream(format!("malformed reply line: {e}"))),
    }
}

/// Local engine that echoes each turn back word by word.
///
/// Used when no remote engine is configured, so a client can be exercised
/// end to end without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoEngine;

#[async_trait]
impl ConversationEngine for EchoEngine {
    async fn respond(
        &self,
        _conversation: &ConversationHandle,
        message: &Message,
    ) -> Result<ReplyStream, EngineError> {
        let text = match (message.origin(), message.body()) {
            (Origin::System { context }, _) => context.hint.clone(),
            (Origin::User, MessageBody::Text { text }) => text.clone(),
            (Origin::User, body) => {
                format!("received {} ({} bytes)", body.kind(), body.payload_size())
            }
        };
        let chunks: Vec<Result<MessageBody, EngineError>> = text
            .split_inclusive(char::is_whitespace)
            .map(|word| Ok(MessageBody::text(word)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wisp_core::{BlobRef, Direction, ProactiveContext, SessionToken, TriggerKind};

    fn message(origin: Origin, body: MessageBody) -> Message {
        Message::new(
            SessionToken::parse("T1").unwrap(),
            Direction::Inbound,
            origin,
            1,
            body,
            Utc::now(),
        )
    }

    async fn collect(stream: ReplyStream) -> Vec<Result<String, String>> {
        stream
            .map(|item| match item {
                Ok(body) => Ok(body.as_text().unwrap_or_default().to_string()),
                Err(e) => Err(e.to_string()),
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_http_engine_streams_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/respond"))
            .and(body_partial_json(serde_json::json!({
                "conversation": "c1",
                "message": {"origin": {"type": "user"}},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"type\":\"text\",\"text\":\"Hello \"}\n\n{\"type\":\"text\",\"text\":\"there\"}",
            ))
            .mount(&server)
            .await;

        let engine = HttpEngine::new(format!("{}/", server.uri()));
        let reply = engine
            .respond(
                &ConversationHandle::new("c1"),
                &message(Origin::User, MessageBody::text("hi")),
            )
            .await
            .unwrap();

        assert_eq!(
            collect(reply).await,
            vec![Ok("Hello ".to_string()), Ok("there".to_string())]
        );
    }

    #[tokio::test]
    async fn test_http_engine_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/respond"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let engine = HttpEngine::new(server.uri());
        let result = engine
            .respond(
                &ConversationHandle::new("c1"),
                &message(Origin::User, MessageBody::text("hi")),
            )
            .await;

        match result {
            Err(EngineError::Unavailable(reason)) => assert!(reason.contains("overloaded")),
            other => panic!("expected unavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_http_engine_connection_refused_is_unavailable() {
        let engine = HttpEngine::new("http://127.0.0.1:1");
        let result = engine
            .respond(
                &ConversationHandle::new("c1"),
                &message(Origin::User, MessageBody::text("hi")),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_http_engine_error_line_fails_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/respond"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"type\":\"text\",\"text\":\"partial\"}\n{\"type\":\"error\",\"message\":\"model crashed\"}\n",
            ))
            .mount(&server)
            .await;

        let engine = HttpEngine::new(server.uri());
        let reply = engine
            .respond(
                &ConversationHandle::new("c1"),
                &message(Origin::User, MessageBody::text("hi")),
            )
            .await
            .unwrap();

        let items = collect(reply).await;
        assert_eq!(items[0], Ok("partial".to_string()));
        assert!(matches!(&items[1], Err(e) if e.contains("model crashed")));
    }

    #[tokio::test]
    async fn test_http_engine_sends_system_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/respond"))
            .and(body_partial_json(serde_json::json!({
                "origin": {
                    "type": "system",
                    "context": {"hint": "Good morning", "trigger": "time_window"},
                },
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"type\":\"text\",\"text\":\"Hi!\"}\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let origin = Origin::System {
            context: ProactiveContext {
                trigger: Some(TriggerKind::TimeWindow),
                hint: "Good morning".to_string(),
                window: None,
                screenshot: None,
            },
        };
        let engine = HttpEngine::new(server.uri());
        let reply = engine
            .respond(
                &ConversationHandle::new("c1"),
                &message(origin, MessageBody::text("Good morning")),
            )
            .await
            .unwrap();
        assert_eq!(collect(reply).await, vec![Ok("Hi!".to_string())]);
    }

    #[tokio::test]
    async fn test_echo_engine_splits_words() {
        let reply = EchoEngine
            .respond(
                &ConversationHandle::new("c1"),
                &message(Origin::User, MessageBody::text("one two three")),
            )
            .await
            .unwrap();
        assert_eq!(
            collect(reply).await,
            vec![
                Ok("one ".to_string()),
                Ok("two ".to_string()),
                Ok("three".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_echo_engine_describes_attachments() {
        let body = MessageBody::Image {
            blob: BlobRef {
                id: "upload_1.png".to_string(),
                size: 42,
                media_type: "image/png".to_string(),
            },
        };
        let reply = EchoEngine
            .respond(&ConversationHandle::new("c1"), &message(Origin::User, body))
            .await
            .unwrap();
        let text: String = collect(reply)
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(text, "received image (42 bytes)");
    }
}
