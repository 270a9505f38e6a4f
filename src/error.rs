//! Error types for the streak bot.

use crate::goals::model::GoalId;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Referenced row missing: {0}")]
    ForeignKey(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// User input the bot refuses. Reported back as plain text; nothing is
/// written and the conversational mode does not change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Goal name cannot be empty")]
    EmptyName,

    #[error("Goal name is {len} characters, the limit is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("You already have a goal called \"{name}\"")]
    DuplicateName { name: String },

    #[error("Progress note cannot be empty")]
    EmptyLog,

    #[error("Progress note is {len} characters, the limit is {max}")]
    LogTooLong { len: usize, max: usize },

    #[error("You already have {max} goals, finish or delete one first")]
    GoalLimitReached { max: usize },
}

/// Errors from goal lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum GoalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Goal {id} not found")]
    NotFound { id: GoalId },

    #[error("User {sender} not found")]
    UserNotFound { sender: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl GoalError {
    /// Not-found outcomes are expected (replayed confirmations, stale
    /// buttons) and are answered with the home menu.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UserNotFound { .. })
    }
}

/// Outbound Send API failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Send API request failed: {0}")]
    Request(String),

    #[error("Send API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Inbound webhook signature failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing X-Hub-Signature-256 header")]
    Missing,

    #[error("Malformed signature header: {0}")]
    Malformed(String),

    #[error("Signature does not match request body")]
    Mismatch,
}
