//! Messenger Send API client.
//!
//! Encodes [`Reply`] values into Send API request bodies and posts them to
//! `/{version}/me/messages`. Failures are returned to the caller, which logs
//! them; nothing here retries.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::channels::gateway::{MAX_BUTTONS, MAX_QUICK_REPLIES, MessagingGateway, Reply};
use crate::error::GatewayError;

/// Maximum text length for a plain Send API message.
const MESSENGER_MAX_TEXT_LENGTH: usize = 2000;
/// Maximum text length on a button template.
const MESSENGER_MAX_TEMPLATE_TEXT: usize = 640;
/// Maximum quick reply / button title length.
const MESSENGER_MAX_TITLE: usize = 20;

/// Messenger gateway: posts to the Graph API Send endpoint.
pub struct MessengerGateway {
    access_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl MessengerGateway {
    pub fn new(access_token: SecretString, graph_api_version: &str) -> Self {
        Self {
            access_token,
            api_base: format!("https://graph.facebook.com/{graph_api_version}"),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different host (local stubs).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/me/messages", self.api_base)
    }

    async fn post(&self, body: &Value) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(self.api_url())
            .query(&[("access_token", self.access_token.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessagingGateway for MessengerGateway {
    fn name(&self) -> &str {
        "messenger"
    }

    async fn send(&self, recipient: &str, reply: &Reply) -> Result<(), GatewayError> {
        for body in send_api_bodies(recipient, reply) {
            self.post(&body).await?;
        }
        tracing::debug!(recipient, "Messenger reply sent");
        Ok(())
    }

    async fn typing(&self, recipient: &str) -> Result<(), GatewayError> {
        self.post(&json!({
            "recipient": { "id": recipient },
            "sender_action": "typing_on",
        }))
        .await
    }
}

// ── Encoding ────────────────────────────────────────────────────────

/// Encode one reply as one or more Send API bodies. Long plain text is
/// split; quick replies ride on the last chunk.
pub fn send_api_bodies(recipient: &str, reply: &Reply) -> Vec<Value> {
    let recipient = json!({ "id": recipient });
    match reply {
        Reply::Text(text) => split_message(text, MESSENGER_MAX_TEXT_LENGTH)
            .into_iter()
            .map(|chunk| json!({ "recipient": recipient, "message": { "text": chunk } }))
            .collect(),
        Reply::QuickReplies { text, options } => {
            let mut chunks = split_message(text, MESSENGER_MAX_TEXT_LENGTH);
            let last = chunks.pop().unwrap_or_default();
            let quick_replies: Vec<Value> = options
                .iter()
                .take(MAX_QUICK_REPLIES)
                .map(|o| {
                    json!({
                        "content_type": "text",
                        "title": truncate(&o.title, MESSENGER_MAX_TITLE),
                        "payload": o.action.encode(),
                    })
                })
                .collect();

            let mut bodies: Vec<Value> = chunks
                .into_iter()
                .map(|chunk| json!({ "recipient": recipient, "message": { "text": chunk } }))
                .collect();
            bodies.push(json!({
                "recipient": recipient,
                "message": { "text": last, "quick_replies": quick_replies },
            }));
            bodies
        }
        Reply::Buttons { text, buttons } => {
            let buttons: Vec<Value> = buttons
                .iter()
                .take(MAX_BUTTONS)
                .map(|b| {
                    json!({
                        "type": "postback",
                        "title": truncate(&b.title, MESSENGER_MAX_TITLE),
                        "payload": b.action.encode(),
                    })
                })
                .collect();
            vec![json!({
                "recipient": recipient,
                "message": {
                    "attachment": {
                        "type": "template",
                        "payload": {
                            "template_type": "button",
                            "text": truncate(text, MESSENGER_MAX_TEMPLATE_TEXT),
                            "buttons": buttons,
                        }
                    }
                }
            })]
        }
    }
}

/// Cut to at most `max` characters, ending in an ellipsis when cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte index of the first character past the limit.
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
