//! Messenger webhook: subscription handshake, signed event intake, health.
//!
//! Routes:
//! - `GET /webhook`  verification handshake (`hub.mode`, `hub.verify_token`, `hub.challenge`)
//! - `POST /webhook` signed event batches, acknowledged immediately
//! - `GET /health`   liveness probe
//!
//! A batch is acknowledged with `200 EVENT_RECEIVED` before any event is
//! handled; its events then run in order on a spawned task, each under the
//! configured time budget.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::channels::gateway::{EventKind, InboundEvent};
use crate::config::BotConfig;
use crate::conversation::manager::ConversationManager;
use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` over the raw request body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Message ids remembered for redelivery detection.
const RECENT_DELIVERY_CAPACITY: usize = 1024;

// ── Signatures ──────────────────────────────────────────────────────

/// Hex HMAC-SHA256 of `body` under `secret`, as sent in the header.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a signature header against the raw body in constant time.
pub fn verify_signature(
    secret: &[u8],
    header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let hex_sig = header
        .strip_prefix("sha256=")
        .ok_or_else(|| SignatureError::Malformed("expected sha256= prefix".into()))?;
    let expected = hex::decode(hex_sig).map_err(|e| SignatureError::Malformed(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    messaging: Vec<Messaging>,
}

#[derive(Debug, Deserialize)]
struct Messaging {
    sender: Party,
    /// Milliseconds since the epoch.
    timestamp: Option<i64>,
    message: Option<WireMessage>,
    postback: Option<WirePostback>,
}

#[derive(Debug, Deserialize)]
struct Party {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    mid: Option<String>,
    text: Option<String>,
    quick_reply: Option<WireQuickReply>,
    #[serde(default)]
    is_echo: bool,
}

#[derive(Debug, Deserialize)]
struct WireQuickReply {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct WirePostback {
    payload: String,
    mid: Option<String>,
}

fn received_at(timestamp_ms: Option<i64>) -> DateTime<Utc> {
    timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Turn one messaging item into an event. Echoes, attachment-only
/// messages and delivery/read receipts yield `None`.
fn normalize(item: Messaging) -> Option<InboundEvent> {
    let received_at = received_at(item.timestamp);
    let (kind, mid) = if let Some(postback) = item.postback {
        (EventKind::Payload(postback.payload), postback.mid)
    } else {
        let message = item.message?;
        if message.is_echo {
            return None;
        }
        let kind = match (message.quick_reply, message.text) {
            (Some(qr), _) => EventKind::Payload(qr.payload),
            (None, Some(text)) => EventKind::Text(text),
            (None, None) => return None,
        };
        (kind, message.mid)
    };

    Some(InboundEvent {
        sender_id: item.sender.id,
        kind,
        message_id: mid,
        received_at,
    })
}

/// Extract the events of a `page` batch. Returns `None` for other objects.
fn parse_batch(payload: WebhookPayload) -> Option<Vec<InboundEvent>> {
    if payload.object != "page" {
        return None;
    }
    Some(
        payload
            .entry
            .into_iter()
            .flat_map(|e| e.messaging)
            .filter_map(normalize)
            .collect(),
    )
}

// ── Redelivery detection ────────────────────────────────────────────

/// A bounded set of recently seen message ids. The oldest id is forgotten
/// once the capacity is reached.
#[derive(Debug)]
pub struct RecentDeliveries {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentDeliveries {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record `mid`. Returns `false` if it was already present.
    pub fn insert(&mut self, mid: &str) -> bool {
        if self.seen.contains(mid) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(mid.to_string());
        self.seen.insert(mid.to_string());
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

// ── Shared state ────────────────────────────────────────────────────

struct WebhookInner {
    manager: Arc<ConversationManager>,
    app_secret: SecretString,
    verify_token: String,
    event_budget: Duration,
    recent: Mutex<RecentDeliveries>,
}

/// Router state for the webhook endpoints.
#[derive(Clone)]
pub struct WebhookState {
    inner: Arc<WebhookInner>,
}

impl WebhookState {
    pub fn new(
        manager: Arc<ConversationManager>,
        app_secret: SecretString,
        verify_token: impl Into<String>,
        event_budget: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(WebhookInner {
                manager,
                app_secret,
                verify_token: verify_token.into(),
                event_budget,
                recent: Mutex::new(RecentDeliveries::new(RECENT_DELIVERY_CAPACITY)),
            }),
        }
    }

    pub fn from_config(manager: Arc<ConversationManager>, config: &BotConfig) -> Self {
        Self::new(
            manager,
            config.app_secret.clone(),
            config.verify_token.clone(),
            config.event_budget,
        )
    }

    /// Drop events whose message id was already delivered.
    fn first_deliveries(&self, events: Vec<InboundEvent>) -> Vec<InboundEvent> {
        let mut recent = self
            .inner
            .recent
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        events
            .into_iter()
            .filter(|ev| match ev.message_id.as_deref() {
                Some(mid) if !recent.insert(mid) => {
                    debug!(sender = %ev.sender_id, mid, "Dropping redelivered event");
                    false
                }
                _ => true,
            })
            .collect()
    }
}

/// Build the webhook router. Merge with other routers as needed.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify_subscription).post(receive_events))
        .route("/health", get(health))
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_subscription(
    State(state): State<WebhookState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let subscribed = query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(state.inner.verify_token.as_str());
    if subscribed {
        info!("Webhook subscription verified");
        (StatusCode::OK, query.challenge.unwrap_or_default()).into_response()
    } else {
        warn!("Webhook verification rejected");
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn receive_events(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(
        state.inner.app_secret.expose_secret().as_bytes(),
        header,
        &body,
    ) {
        warn!(error = %e, "Rejecting webhook delivery");
        return StatusCode::FORBIDDEN.into_response();
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Unparsable webhook body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let Some(events) = parse_batch(payload) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let events = state.first_deliveries(events);
    debug!(count = events.len(), "Webhook batch accepted");

    if !events.is_empty() {
        let state = state.clone();
        tokio::spawn(async move {
            for event in events {
                process_event(&state, event).await;
            }
        });
    }

    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}

async fn process_event(state: &WebhookState, event: InboundEvent) {
    let sender = event.sender_id.clone();
    let budget = state.inner.event_budget;
    match tokio::time::timeout(budget, state.inner.manager.handle(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(sender = %sender, error = %e, "Event handling failed"),
        Err(_) => warn!(
            sender = %sender,
            budget_secs = budget.as_secs(),
            "Event exceeded its time budget"
        ),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"app-secret";

    fn parse(json: &str) -> Option<Vec<InboundEvent>> {
        parse_batch(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"object":"page"}"#;
        let header = sign(SECRET, body).unwrap();
        assert!(header.starts_with("sha256="));
        assert_eq!(verify_signature(SECRET, Some(header.as_str()), body), Ok(()));
    }

    #[test]
    fn signature_failures() {
        let body = b"{}";
        assert_eq!(
            verify_signature(SECRET, None, body),
            Err(SignatureError::Missing)
        );
        assert!(matches!(
            verify_signature(SECRET, Some("sha1=abcd"), body),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify_signature(SECRET, Some("sha256=zz"), body),
            Err(SignatureError::Malformed(_))
        ));
        let wrong = sign(b"other-secret", body).unwrap();
        assert_eq!(
            verify_signature(SECRET, Some(wrong.as_str()), body),
            Err(SignatureError::Mismatch)
        );
        let tampered = sign(SECRET, b"{ }").unwrap();
        assert_eq!(
            verify_signature(SECRET, Some(tampered.as_str()), body),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn parses_text_quick_reply_and_postback() {
        let events = parse(
            r#"{"object":"page","entry":[{"messaging":[
                {"sender":{"id":"1"},"timestamp":1772614800000,"message":{"mid":"m1","text":"hello"}},
                {"sender":{"id":"1"},"message":{"mid":"m2","text":"New goal","quick_reply":{"payload":"Payload new goal"}}},
                {"sender":{"id":"2"},"postback":{"title":"Finish","payload":"home"}}
            ]}]}"#,
        )
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::Text("hello".into()));
        assert_eq!(events[0].message_id.as_deref(), Some("m1"));
        assert_eq!(
            events[0].received_at,
            Utc.timestamp_millis_opt(1_772_614_800_000).unwrap()
        );
        assert_eq!(events[1].kind, EventKind::Payload("Payload new goal".into()));
        assert_eq!(events[2].sender_id, "2");
        assert_eq!(events[2].kind, EventKind::Payload("home".into()));
        assert!(events[2].message_id.is_none());
    }

    #[test]
    fn drops_echoes_attachments_and_receipts() {
        let events = parse(
            r#"{"object":"page","entry":[{"messaging":[
                {"sender":{"id":"1"},"message":{"mid":"m1","text":"hi","is_echo":true}},
                {"sender":{"id":"1"},"message":{"mid":"m2","attachments":[{"type":"image"}]}},
                {"sender":{"id":"1"},"delivery":{"mids":["m0"],"watermark":1}},
                {"sender":{"id":"1"},"read":{"watermark":1}}
            ]}]}"#,
        )
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn non_page_object_is_ignored() {
        assert!(parse(r#"{"object":"instagram","entry":[]}"#).is_none());
    }

    #[test]
    fn recent_deliveries_are_bounded() {
        let mut recent = RecentDeliveries::new(2);
        assert!(recent.insert("a"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(recent.insert("c"));
        assert_eq!(recent.len(), 2);
        // "a" was evicted and counts as new again.
        assert!(recent.insert("a"));
        assert!(!recent.insert("c"));
    }
}
