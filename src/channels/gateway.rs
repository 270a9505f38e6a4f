//! Messaging gateway abstraction: inbound events and outbound replies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::action::Action;
use crate::error::GatewayError;

/// Quick replies the platform renders under one message.
pub const MAX_QUICK_REPLIES: usize = 11;
/// Buttons allowed on a button template.
pub const MAX_BUTTONS: usize = 3;

/// What the user did, after the webhook has normalized it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Free text typed by the user.
    Text(String),
    /// A tapped quick reply or postback button, raw payload.
    Payload(String),
}

/// One inbound event from one sender.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender_id: String,
    pub kind: EventKind,
    /// Platform message id, used to drop redeliveries.
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: EventKind::Text(text.into()),
            message_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn payload(sender_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: EventKind::Payload(payload.into()),
            message_id: None,
            received_at: Utc::now(),
        }
    }

    /// Builder: set the receive time.
    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// A bounded-choice option shown under a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickReply {
    pub title: String,
    pub action: Action,
}

impl QuickReply {
    pub fn new(title: impl Into<String>, action: Action) -> Self {
        Self {
            title: title.into(),
            action,
        }
    }
}

/// A postback button on a button template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub title: String,
    pub action: Action,
}

impl Button {
    pub fn new(title: impl Into<String>, action: Action) -> Self {
        Self {
            title: title.into(),
            action,
        }
    }
}

/// A structured outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    QuickReplies {
        text: String,
        options: Vec<QuickReply>,
    },
    Buttons {
        text: String,
        buttons: Vec<Button>,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// The message text, whatever the shape.
    pub fn body(&self) -> &str {
        match self {
            Self::Text(text) | Self::QuickReplies { text, .. } | Self::Buttons { text, .. } => text,
        }
    }

    /// Actions the user can trigger from this reply.
    pub fn actions(&self) -> Vec<Action> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::QuickReplies { options, .. } => options.iter().map(|o| o.action).collect(),
            Self::Buttons { buttons, .. } => buttons.iter().map(|b| b.action).collect(),
        }
    }
}

/// Delivers replies to an end user. Implementations may fail transiently;
/// callers log and move on.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Gateway name for logs.
    fn name(&self) -> &str;

    /// Send one reply to `recipient`.
    async fn send(&self, recipient: &str, reply: &Reply) -> Result<(), GatewayError>;

    /// Show a typing indicator. Optional.
    async fn typing(&self, _recipient: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}
