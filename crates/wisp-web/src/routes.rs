//! Web routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use wisp_bridge::{BridgeError, MessageBridge};
use wisp_core::{
    BlobError, BlobRef, BlobStore, CapturedFrame, InboundMessage, MessageBody, MessageKind,
    SessionToken, WindowDescriptor,
};
use wisp_scheduler::ProactiveScheduler;
use wisp_screenshots::{PushedFrameCapture, ScreenshotStore};

use crate::WebError;
use crate::sse::create_reply_stream;
use crate::wire::{
    DesktopStateRequest, InboundRequest, LimitQuery, ToggleRequest, default_media_type,
};

/// Records returned by the screenshot listing when no limit is given.
const DEFAULT_SCREENSHOT_LIMIT: usize = 10;

/// Shared state for the web server.
pub struct AppState {
    pub bridge: Arc<MessageBridge>,
    pub scheduler: Arc<ProactiveScheduler>,
    pub screenshots: Arc<ScreenshotStore>,
    /// Blobs uploaded with inbound messages.
    pub uploads: Arc<dyn BlobStore>,
    /// Blobs written by the screenshot store.
    pub screenshot_blobs: Arc<dyn BlobStore>,
    /// Receives screenshots carried by desktop state reports.
    pub frames: Arc<PushedFrameCapture>,
    /// Largest decoded payload accepted on upload.
    pub max_payload_bytes: u64,
}

/// Create the web router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Base64 inflates payloads by a third.
    let body_limit = (state.max_payload_bytes as usize).saturating_mul(4) / 3 + 64 * 1024;

    Router::new()
        // Conversation
        .route("/api/messages", post(post_message))
        .route("/api/sessions/{token}", axum::routing::delete(disconnect))
        .route("/api/sessions/{token}/stream", get(stream_replies))
        .route("/api/sessions/{token}/desktop-state", post(desktop_state))
        .route("/api/sessions/{token}/heartbeat", post(heartbeat))
        .route("/api/sessions/{token}/proactive", post(trigger_proactive))
        // Proactive dialogue
        .route("/api/proactive", get(proactive_status).put(set_proactive))
        // Screenshots
        .route(
            "/api/screenshots",
            get(list_screenshots).delete(clear_screenshots),
        )
        .route("/api/screenshots/capture", post(capture_screenshot))
        .route("/api/screenshots/monitoring", put(set_monitoring))
        // Blobs
        .route("/api/blobs/{id}", get(get_blob))
        // Other
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_token(raw: &str) -> Result<SessionToken, WebError> {
    SessionToken::parse(raw).ok_or_else(|| WebError::BadRequest("invalid session token".to_string()))
}

/// Credentials from an `Authorization: Bearer` header.
fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
}

fn decode(data: &str, limit: u64) -> Result<Vec<u8>, WebError> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| WebError::BadRequest(format!("payload is not valid base64: {e}")))?;
    let size = bytes.len() as u64;
    if size > limit {
        return Err(BridgeError::PayloadTooLarge { size, limit }.into());
    }
    Ok(bytes)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.bridge.registry().len(),
        "proactiveEnabled": state.scheduler.is_enabled(),
        "monitoring": state.screenshots.is_monitoring(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<InboundRequest>,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&request.token)?;

    let (body, stored) = match request.kind {
        MessageKind::Text => {
            let text = request
                .text
                .ok_or_else(|| WebError::BadRequest("text message has no text".to_string()))?;
            (MessageBody::text(text), None)
        }
        kind => {
            let data = request
                .data
                .ok_or_else(|| WebError::BadRequest(format!("{kind} message has no data")))?;
            let bytes = decode(&data, state.max_payload_bytes)?;
            let media_type = request
                .media_type
                .unwrap_or_else(|| default_media_type(kind).to_string());
            let blob = state.uploads.put(&bytes, &media_type).await?;
            let body = match kind {
                MessageKind::Image => MessageBody::Image { blob: blob.clone() },
                MessageKind::Audio => MessageBody::Audio { blob: blob.clone() },
                _ => MessageBody::File {
                    blob: blob.clone(),
                    filename: request.filename.unwrap_or_default(),
                },
            };
            (body, Some(blob))
        }
    };

    let message = InboundMessage::user(token, body, Utc::now()).with_credentials(bearer(&headers));
    match state.bridge.ingest(message).await {
        Ok(acceptance) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "accepted": acceptance.accepted,
                "sequence": acceptance.sequence,
            })),
        )),
        Err(e) => {
            if let Some(blob) = stored {
                discard_upload(&state, &blob).await;
            }
            Err(e.into())
        }
    }
}

/// Remove an upload whose message was rejected.
async fn discard_upload(state: &AppState, blob: &BlobRef) {
    if let Err(e) = state.uploads.delete(&blob.id).await {
        warn!(blob = %blob.id, error = %e, "failed to discard rejected upload");
    }
}

async fn stream_replies(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&token)?;
    let credentials = bearer(&headers);
    state
        .bridge
        .registry()
        .resolve(&token, credentials.as_deref())
        .await?;
    debug!(token = %token, "reply stream opened");
    Ok(create_reply_stream(Arc::clone(&state.bridge), token))
}

async fn desktop_state(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(report): Json<DesktopStateRequest>,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&token)?;
    let credentials = bearer(&headers);
    let registry = state.bridge.registry();
    let resolved = registry.resolve(&token, credentials.as_deref()).await?;

    let generation = if report.window_title.is_some() || report.process_name.is_some() {
        let window = WindowDescriptor {
            title: report.window_title,
            process: report.process_name,
        };
        registry.report_window(&token, window)?
    } else {
        registry.touch(&token)?;
        resolved.session.snapshot().window_generation
    };

    if let Some(data) = report.screenshot_base64 {
        let bytes = decode(&data, state.max_payload_bytes)?;
        let media_type = report
            .media_type
            .unwrap_or_else(|| default_media_type(MessageKind::Image).to_string());
        state.frames.push(CapturedFrame { bytes, media_type });
    }

    Ok(Json(json!({
        "type": "desktop_state_ack",
        "receivedAt": Utc::now(),
        "windowGeneration": generation,
    })))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&token)?;
    state.bridge.registry().touch(&token)?;
    Ok(Json(json!({ "type": "heartbeat_ack" })))
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&token)?;
    state.bridge.disconnect(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_proactive(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let token = parse_token(&token)?;
    let firing = state.scheduler.trigger_now(&token).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "hint": firing.hint,
            "firedAt": firing.at,
            "cooldownUntil": firing.cooldown_until,
        })),
    ))
}

async fn proactive_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn set_proactive(
    State(state): State<Arc<AppState>>,
    Json(toggle): Json<ToggleRequest>,
) -> impl IntoResponse {
    state.scheduler.set_enabled(toggle.enabled);
    Json(state.scheduler.status())
}

async fn list_screenshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_SCREENSHOT_LIMIT);
    let stats = state.screenshots.stats().await;
    let records = state.screenshots.latest(limit).await;
    Json(json!({
        "stats": stats,
        "records": records,
    }))
}

async fn clear_screenshots(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let removed = state.screenshots.clear().await;
    Json(json!({ "removed": removed }))
}

async fn capture_screenshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, WebError> {
    let record = state.screenshots.capture_now().await?;
    state.screenshots.sweep().await;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn set_monitoring(
    State(state): State<Arc<AppState>>,
    Json(toggle): Json<ToggleRequest>,
) -> impl IntoResponse {
    state.screenshots.set_monitoring(toggle.enabled);
    Json(state.screenshots.stats().await)
}

async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    for store in [&state.uploads, &state.screenshot_blobs] {
        match store.read(&id).await {
            Ok((blob, bytes)) => {
                return Ok(([(header::CONTENT_TYPE, blob.media_type)], bytes));
            }
            Err(BlobError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(BlobError::NotFound(id).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::StreamExt;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use wisp_bridge::{AllowAll, BridgeConfig, RegistryConfig, SessionRegistry, SharedSecret};
    use wisp_core::{
        Authorizer, ConversationEngine, ConversationHandle, EngineError, FsBlobStore, Message,
        ReplyStream, SystemClock,
    };
    use wisp_scheduler::ProactiveConfig;
    use wisp_screenshots::{RetentionPolicy, ScreenshotConfig};

    /// Replies with each word of the inbound text as its own chunk.
    struct WordsEngine;

    #[async_trait]
    impl ConversationEngine for WordsEngine {
        async fn respond(
            &self,
            _conversation: &ConversationHandle,
            message: &Message,
        ) -> Result<ReplyStream, EngineError> {
            let words: Vec<Result<MessageBody, EngineError>> = message
                .body()
                .as_text()
                .unwrap_or("attachment")
                .split_whitespace()
                .map(|w| Ok(MessageBody::text(w)))
                .collect();
            Ok(stream::iter(words).boxed())
        }
    }

    struct Fixture {
        _dir: TempDir,
        state: Arc<AppState>,
    }

    async fn fixture_with(authorizer: Arc<dyn Authorizer>, max_payload_bytes: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let uploads: Arc<dyn BlobStore> =
            Arc::new(FsBlobStore::open(dir.path().join("uploads"), "upload").await.unwrap());
        let screenshot_blobs: Arc<dyn BlobStore> = Arc::new(
            FsBlobStore::open(dir.path().join("screenshots"), "screenshot")
                .await
                .unwrap(),
        );
        let clock = Arc::new(SystemClock);
        let frames = Arc::new(PushedFrameCapture::new());
        let screenshots = Arc::new(ScreenshotStore::new(
            Arc::clone(&screenshot_blobs),
            Arc::clone(&frames) as _,
            clock.clone(),
            ScreenshotConfig {
                interval: Duration::from_secs(60),
                retention: RetentionPolicy::new(2, chrono::Duration::hours(1)),
                monitoring: true,
            },
        ));
        let registry = Arc::new(SessionRegistry::new(
            authorizer,
            clock,
            RegistryConfig::default(),
        ));
        let bridge = Arc::new(MessageBridge::new(
            registry,
            Arc::new(WordsEngine),
            BridgeConfig {
                max_payload_bytes,
                ..BridgeConfig::default()
            },
        ));
        let scheduler = Arc::new(ProactiveScheduler::new(
            Arc::clone(&bridge),
            Some(Arc::clone(&screenshots)),
            ProactiveConfig {
                enabled: false,
                seed: Some(3),
                ..ProactiveConfig::default()
            },
        ));
        let state = Arc::new(AppState {
            bridge,
            scheduler,
            screenshots,
            uploads,
            screenshot_blobs,
            frames,
            max_payload_bytes,
        });
        Fixture { _dir: dir, state }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(AllowAll::new()), 1024).await
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// Read SSE frames until one reply has been fully delivered.
    async fn read_reply(state: &Arc<AppState>, token: &str) -> Vec<Value> {
        let response = create_router(Arc::clone(state))
            .oneshot(empty_request("GET", &format!("/api/sessions/{token}/stream")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let mut buffer = String::new();
        let mut frames = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(bytes) = body.next().await {
                buffer.push_str(&String::from_utf8_lossy(&bytes.unwrap()));
                while let Some(end) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..end + 2).collect();
                    for line in event.lines() {
                        if let Some(data) = line.strip_prefix("data:") {
                            let frame: Value = serde_json::from_str(data.trim()).unwrap();
                            let done = frame["isFinal"] == Value::Bool(true);
                            frames.push(frame);
                            if done {
                                return;
                            }
                        }
                    }
                }
            }
        })
        .await
        .unwrap();
        frames
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let fx = fixture().await;
        let (status, body) = send(&fx.state, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_text_message_streams_reply() {
        let fx = fixture().await;
        let (status, body) = send(
            &fx.state,
            json_request(
                "POST",
                "/api/messages",
                json!({"token": "T1", "kind": "text", "text": "hi there"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"accepted": true, "sequence": 1}));

        let frames = read_reply(&fx.state, "T1").await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["payload"], "hi");
        assert_eq!(frames[1]["payload"], "there");
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame["sequence"], 1);
            assert_eq!(frame["index"], i);
            assert_eq!(frame["origin"], "user");
            assert_eq!(frame["kind"], "text");
        }
        assert_eq!(frames[1]["isFinal"], true);
    }

    #[tokio::test]
    async fn test_shared_secret_rejects_bad_credentials() {
        let fx = fixture_with(Arc::new(SharedSecret::new("letmein")), 1024).await;
        let message = json!({"token": "T1", "kind": "text", "text": "hi"});

        let (status, body) =
            send(&fx.state, json_request("POST", "/api/messages", message.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["retryable"], false);
        assert_eq!(fx.state.bridge.registry().len(), 0);

        let mut request = json_request("POST", "/api/messages", message);
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer letmein".parse().unwrap());
        let (status, _) = send(&fx.state, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_oversize_upload_is_rejected_without_storing() {
        let fx = fixture().await;
        let data = BASE64.encode(vec![0u8; 2048]);
        let (status, _) = send(
            &fx.state,
            json_request(
                "POST",
                "/api/messages",
                json!({"token": "T1", "kind": "image", "data": data}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(fx.state.uploads.list().await.unwrap().is_empty());
        assert!(fx.state.bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_messages_are_bad_requests() {
        let fx = fixture().await;
        let cases = [
            json!({"token": "T1", "kind": "image", "data": "not base64!"}),
            json!({"token": "T1", "kind": "text"}),
            json!({"token": "T1", "kind": "text", "text": "   "}),
            json!({"token": "", "kind": "text", "text": "hi"}),
        ];
        for case in cases {
            let (status, _) = send(&fx.state, json_request("POST", "/api/messages", case)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_file_without_name_discards_upload() {
        let fx = fixture().await;
        let data = BASE64.encode(b"contents");
        let (status, _) = send(
            &fx.state,
            json_request(
                "POST",
                "/api/messages",
                json!({"token": "T1", "kind": "file", "data": data}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(fx.state.uploads.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_and_disconnect() {
        let fx = fixture().await;
        let (status, _) = send(&fx.state, empty_request("POST", "/api/sessions/T1/heartbeat")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(
            &fx.state,
            json_request("POST", "/api/sessions/T1/desktop-state", json!({})),
        )
        .await;
        let (status, body) =
            send(&fx.state, empty_request("POST", "/api/sessions/T1/heartbeat")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"type": "heartbeat_ack"}));

        let (status, _) = send(&fx.state, empty_request("DELETE", "/api/sessions/T1")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&fx.state, empty_request("POST", "/api/sessions/T1/heartbeat")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_desktop_state_tracks_window_and_frame() {
        let fx = fixture().await;
        let report = json!({"windowTitle": "editor", "processName": "code"});

        let (status, body) = send(
            &fx.state,
            json_request("POST", "/api/sessions/T1/desktop-state", report.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "desktop_state_ack");
        assert_eq!(body["windowGeneration"], 1);

        // Same window again does not advance the generation.
        let (_, body) = send(
            &fx.state,
            json_request("POST", "/api/sessions/T1/desktop-state", report),
        )
        .await;
        assert_eq!(body["windowGeneration"], 1);

        let with_frame = json!({
            "windowTitle": "browser",
            "screenshotBase64": BASE64.encode(b"png bytes"),
        });
        let (_, body) = send(
            &fx.state,
            json_request("POST", "/api/sessions/T1/desktop-state", with_frame),
        )
        .await;
        assert_eq!(body["windowGeneration"], 2);
        assert!(fx.state.frames.has_frame());
    }

    #[tokio::test]
    async fn test_screenshot_capture_list_and_clear() {
        let fx = fixture().await;

        // Nothing pushed yet.
        let (status, body) =
            send(&fx.state, empty_request("POST", "/api/screenshots/capture")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["retryable"], true);

        for i in 0..3u8 {
            fx.state.frames.push(CapturedFrame::png(vec![i; 4]));
            let (status, _) =
                send(&fx.state, empty_request("POST", "/api/screenshots/capture")).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) =
            send(&fx.state, empty_request("GET", "/api/screenshots?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["count"], 2);
        assert_eq!(body["stats"]["maxCount"], 2);
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);

        let blob_id = records[0]["blob"]["id"].as_str().unwrap().to_string();
        let response = create_router(Arc::clone(&fx.state))
            .oneshot(empty_request("GET", &format!("/api/blobs/{blob_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), &[2u8; 4]);

        let (_, body) = send(&fx.state, empty_request("DELETE", "/api/screenshots")).await;
        assert_eq!(body, json!({"removed": 2}));
        let (status, _) =
            send(&fx.state, empty_request("GET", &format!("/api/blobs/{blob_id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_proactive_toggle_and_trigger() {
        let fx = fixture().await;
        send(
            &fx.state,
            json_request("POST", "/api/sessions/T1/desktop-state", json!({})),
        )
        .await;

        let (status, _) =
            send(&fx.state, empty_request("POST", "/api/sessions/T1/proactive")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &fx.state,
            json_request("PUT", "/api/proactive", json!({"enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);

        let (status, body) =
            send(&fx.state, empty_request("POST", "/api/sessions/T1/proactive")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["hint"].is_string());

        let frames = read_reply(&fx.state, "T1").await;
        assert!(frames.iter().all(|f| f["origin"] == "system"));
        assert_eq!(frames.last().unwrap()["isFinal"], true);

        let (_, body) = send(&fx.state, empty_request("GET", "/api/proactive")).await;
        assert_eq!(body["manualFirings"], 1);
        assert_eq!(body["sessions"]["cooldown"], 1);
    }

    #[tokio::test]
    async fn test_unknown_blob_is_not_found() {
        let fx = fixture().await;
        let (status, _) = send(
            &fx.state,
            empty_request("GET", "/api/blobs/upload_missing.png"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&fx.state, empty_request("GET", "/api/blobs/bad..id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
