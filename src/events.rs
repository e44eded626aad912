// events.rs - Slack Events Ingress
// HTTP endpoint for the Slack Events API. Every request is authenticated with
// the signing secret before its body is looked at. Handshakes are answered
// directly. App mentions are queued for the background worker so the request
// is acknowledged immediately, well inside Slack's three second retry window.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use log::{debug, error, info, warn};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dispatcher::MentionDispatcher;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Requests signed further than this from the current time are replays
pub const MAX_REQUEST_AGE_SECS: i64 = 60 * 5;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// A bot mention, as delivered by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub user: String,
    pub channel: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    HandshakeChallenge(String),
    Mention(Mention),
    /// Any callback this bot does not act on, by event type
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    challenge: Option<String>,
    event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AppMentionEvent {
    #[serde(default)]
    user: String,
    channel: String,
    #[serde(default)]
    text: String,
    ts: String,
    thread_ts: Option<String>,
}

/// Check the `v0` HMAC signature Slack attaches to every request.
pub fn verify_signature(
    signing_secret: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> Result<(), IngressError> {
    let timestamp = header_value(headers, TIMESTAMP_HEADER)?;
    let signature = header_value(headers, SIGNATURE_HEADER)?;

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| IngressError::Authentication(format!("invalid timestamp {:?}", timestamp)))?;
    if (now - sent_at).abs() > MAX_REQUEST_AGE_SECS {
        return Err(IngressError::Authentication(format!(
            "request timestamp {} is too old",
            sent_at
        )));
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or_else(|| IngressError::Authentication("unrecognised signature format".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|e| IngressError::Authentication(e.to_string()))?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| IngressError::Authentication("signature mismatch".to_string()))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, IngressError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| IngressError::Authentication(format!("missing {} header", name)))
}

/// Turn a request body into the event it carries.
pub fn parse_event(body: &[u8]) -> Result<InboundEvent, IngressError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| IngressError::MalformedEvent(e.to_string()))?;

    match envelope.kind.as_deref() {
        None | Some("url_verification") => match envelope.challenge {
            Some(challenge) => Ok(InboundEvent::HandshakeChallenge(challenge)),
            None => Ok(InboundEvent::Other("url_verification".to_string())),
        },
        Some("event_callback") => {
            let event = envelope
                .event
                .ok_or_else(|| IngressError::MalformedEvent("event_callback without event".to_string()))?;
            let event_type = event
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            if event_type != "app_mention" {
                return Ok(InboundEvent::Other(event_type));
            }

            let mention: AppMentionEvent = serde_json::from_value(event)
                .map_err(|e| IngressError::MalformedEvent(e.to_string()))?;
            Ok(InboundEvent::Mention(Mention {
                user: mention.user,
                channel: mention.channel,
                text: mention.text,
                ts: mention.ts,
                thread_ts: mention.thread_ts.filter(|ts| !ts.is_empty()),
            }))
        }
        Some(other) => Ok(InboundEvent::Other(other.to_string())),
    }
}

/// Handoff between the HTTP handler and the mention worker.
#[derive(Clone)]
pub struct MentionQueue {
    tx: mpsc::UnboundedSender<Mention>,
}

impl MentionQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Mention>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the worker has stopped.
    pub fn submit(&self, mention: Mention) -> bool {
        self.tx.send(mention).is_ok()
    }
}

/// Spawn a processing task for every queued mention until shutdown.
///
/// Returns only after every spawned mention has reached its final status, so
/// a cancelled mention still gets its cancellation shown to the user.
pub async fn run_mention_worker(
    mut rx: mpsc::UnboundedReceiver<Mention>,
    dispatcher: Arc<MentionDispatcher>,
    shutdown: CancellationToken,
) {
    info!("👷 Mention worker started");
    let tracker = TaskTracker::new();
    loop {
        let mention = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(mention) => mention,
                None => break,
            },
        };
        spawn_mention(&tracker, &dispatcher, mention, shutdown.child_token());
    }

    // Already acknowledged to Slack, so each one still gets a status message
    rx.close();
    while let Ok(mention) = rx.try_recv() {
        spawn_mention(&tracker, &dispatcher, mention, shutdown.child_token());
    }

    tracker.close();
    info!("👷 Mention worker stopping, waiting for {} mentions", tracker.len());
    tracker.wait().await;
    info!("👷 Mention worker stopped");
}

fn spawn_mention(
    tracker: &TaskTracker,
    dispatcher: &Arc<MentionDispatcher>,
    mention: Mention,
    cancel: CancellationToken,
) {
    let dispatcher = dispatcher.clone();
    tracker.spawn(async move {
        let state = dispatcher.handle(&mention, &cancel).await;
        debug!("🏁 Mention {} in {} finished as {:?}", mention.ts, mention.channel, state);
    });
}

#[derive(Clone)]
pub struct AppState {
    pub signing_secret: Arc<str>,
    pub queue: MentionQueue,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(handle_events))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

pub async fn handle_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!("❌ Failed to read event body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = verify_signature(&state.signing_secret, &headers, &body, now) {
        warn!("🔒 Rejected event request: {}", e);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(e) => {
            error!("❌ Failed to parse event: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match event {
        InboundEvent::HandshakeChallenge(challenge) => {
            info!("🤝 Answering URL verification challenge");
            ([(header::CONTENT_TYPE, "text/plain")], challenge).into_response()
        }
        InboundEvent::Mention(mention) => {
            info!("📥 Queued mention {} from user {} in {}", mention.ts, mention.user, mention.channel);
            if !state.queue.submit(mention) {
                error!("❌ Mention worker is not running, mention dropped");
            }
            StatusCode::OK.into_response()
        }
        InboundEvent::Other(kind) => {
            debug!("⏭️ Ignoring event of type {}", kind);
            StatusCode::OK.into_response()
        }
    }
}
