//! Channel abstraction for message I/O.

pub mod gateway;
pub mod messenger;
pub mod webhook;

pub use gateway::*;
pub use messenger::MessengerGateway;
pub use webhook::{WebhookState, webhook_routes};
