//! Conversation state machine: user modes, payload actions, and replies.

pub mod action;
pub mod manager;
pub mod replies;
pub mod state;

pub use action::Action;
pub use manager::ConversationManager;
pub use state::{User, UserMode};
