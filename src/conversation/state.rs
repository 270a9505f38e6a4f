//! Conversational mode: what the user's next free-text message means.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::goals::model::GoalId;

/// The server-held mode for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "goal_id", rename_all = "snake_case")]
pub enum UserMode {
    /// Free text is matched against keywords, otherwise the home menu.
    #[default]
    Idle,
    /// Free text is the name of a new goal.
    NamingGoal,
    /// Free text is a progress note for the given goal.
    LoggingProgress(GoalId),
}

impl UserMode {
    /// Whether the next free-text message is consumed as input.
    pub fn awaits_input(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Column value for the `mode` column.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::NamingGoal => "naming_goal",
            Self::LoggingProgress(_) => "logging_progress",
        }
    }

    /// Goal referenced by the mode, if any.
    pub fn goal_id(&self) -> Option<GoalId> {
        match self {
            Self::LoggingProgress(id) => Some(*id),
            _ => None,
        }
    }

    /// Rebuild from the stored tag and goal column. Unknown or incomplete
    /// values fall back to `Idle`.
    pub fn from_parts(tag: &str, goal_id: Option<GoalId>) -> Self {
        match (tag, goal_id) {
            ("naming_goal", _) => Self::NamingGoal,
            ("logging_progress", Some(id)) => Self::LoggingProgress(id),
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for UserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggingProgress(id) => write!(f, "logging_progress({id})"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// A chat user, keyed by the platform sender id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub sender_id: String,
    pub mode: UserMode,
    /// Live goals owned, 0..=5.
    pub goal_count: u32,
    /// Finish summaries, newest first.
    pub finished_goals: Vec<String>,
    /// Next line to send from the motivation feed.
    pub last_motivation_index: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A first-contact user: idle, no goals.
    pub fn new(sender_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            sender_id: sender_id.into(),
            mode: UserMode::Idle,
            goal_count: 0,
            finished_goals: Vec::new(),
            last_motivation_index: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
