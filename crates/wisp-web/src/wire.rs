//! Wire formats for requests and stream frames.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use wisp_core::{BlobRef, MessageBody, MessageKind, OutboundChunk};

/// An inbound message as posted by the client.
///
/// Binary payloads arrive base64-encoded in `data` and are moved into the
/// blob store before the message reaches the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    pub token: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// A desktop state report.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopStateRequest {
    #[serde(default)]
    pub window_title: Option<String>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub screenshot_base64: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One reply chunk as sent on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub sequence: u64,
    pub index: u32,
    /// `text`, `image`, `audio`, `file` or `error`.
    pub kind: &'static str,
    /// `user` or `system`.
    pub origin: &'static str,
    pub payload: Value,
    pub is_final: bool,
}

impl From<&OutboundChunk> for OutboundFrame {
    fn from(chunk: &OutboundChunk) -> Self {
        let (kind, payload) = match (&chunk.failure, chunk.message.body()) {
            (Some(failure), _) => ("error", Value::String(failure.clone())),
            (None, MessageBody::Text { text }) => ("text", Value::String(text.clone())),
            (None, MessageBody::Image { blob }) => ("image", blob_payload(blob)),
            (None, MessageBody::Audio { blob }) => ("audio", blob_payload(blob)),
            (None, MessageBody::File { blob, filename }) => {
                let mut payload = blob_payload(blob);
                payload["filename"] = Value::String(filename.clone());
                ("file", payload)
            }
        };
        Self {
            sequence: chunk.sequence(),
            index: chunk.index,
            kind,
            origin: chunk.message.origin().label(),
            payload,
            is_final: chunk.is_final,
        }
    }
}

fn blob_payload(blob: &BlobRef) -> Value {
    json!({
        "id": blob.id,
        "size": blob.size,
        "mediaType": blob.media_type,
    })
}

/// Media type assumed when the client does not send one.
pub(crate) fn default_media_type(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text/plain",
        MessageKind::Image => "image/png",
        MessageKind::Audio => "audio/wav",
        MessageKind::File => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use wisp_core::{Direction, Message, Origin, SessionToken};

    fn chunk(body: MessageBody, failure: Option<String>) -> OutboundChunk {
        OutboundChunk {
            message: Message::new(
                SessionToken::parse("T1").unwrap(),
                Direction::Outbound,
                Origin::User,
                4,
                body,
                Utc::now(),
            ),
            index: 2,
            is_final: true,
            failure,
        }
    }

    #[test]
    fn test_text_frame() {
        let frame = OutboundFrame::from(&chunk(MessageBody::text("hello"), None));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "sequence": 4,
                "index": 2,
                "kind": "text",
                "origin": "user",
                "payload": "hello",
                "isFinal": true,
            })
        );
    }

    #[test]
    fn test_blob_frame_carries_reference() {
        let blob = BlobRef {
            id: "upload_abc.png".to_string(),
            size: 12,
            media_type: "image/png".to_string(),
        };
        let frame = OutboundFrame::from(&chunk(MessageBody::Image { blob }, None));
        assert_eq!(frame.kind, "image");
        assert_eq!(
            frame.payload,
            json!({"id": "upload_abc.png", "size": 12, "mediaType": "image/png"})
        );
    }

    #[test]
    fn test_failure_frame_is_error_kind() {
        let frame = OutboundFrame::from(&chunk(
            MessageBody::text("engine down"),
            Some("engine down".to_string()),
        ));
        assert_eq!(frame.kind, "error");
        assert_eq!(frame.payload, json!("engine down"));
    }

    #[test]
    fn test_inbound_request_defaults() {
        let request: InboundRequest =
            serde_json::from_str(r#"{"token":"T1","kind":"text","text":"hi"}"#).unwrap();
        assert_eq!(request.kind, MessageKind::Text);
        assert_eq!(request.text.as_deref(), Some("hi"));
        assert!(request.data.is_none());
    }
}
