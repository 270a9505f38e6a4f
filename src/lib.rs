//! Streak Bot: a Messenger chatbot that tracks daily goal streaks.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod goals;
pub mod motivation;
pub mod store;
