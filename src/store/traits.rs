//! `Database` trait: the persistence contract the bot relies on.
//!
//! Lookups that find nothing return `Ok(None)` / `Ok(false)`; errors are
//! reserved for the store itself failing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::state::{User, UserMode};
use crate::error::DatabaseError;
use crate::goals::model::{Goal, GoalId, LogEntry};

/// Partial update for a user. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub mode: Option<UserMode>,
    pub goal_count: Option<u32>,
    pub finished_goals: Option<Vec<String>>,
    pub last_motivation_index: Option<u32>,
}

impl UserPatch {
    pub fn mode(mode: UserMode) -> Self {
        Self {
            mode: Some(mode),
            ..Default::default()
        }
    }
}

/// Partial update for a goal. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalPatch {
    pub streak: Option<u32>,
    pub total: Option<u32>,
    pub log: Option<Vec<LogEntry>>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub last_update_weekday: Option<u32>,
}

/// Backend-agnostic store for users and goals.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Find a user by sender id.
    async fn get_user(&self, sender_id: &str) -> Result<Option<User>, DatabaseError>;

    /// Insert a user unless one with the same sender id exists.
    /// Returns `true` if this call created it.
    async fn insert_user(&self, user: &User) -> Result<bool, DatabaseError>;

    /// Apply a partial update. Returns `false` if no such user.
    async fn update_user(&self, sender_id: &str, patch: &UserPatch)
    -> Result<bool, DatabaseError>;

    // ── Goals ───────────────────────────────────────────────────────

    /// Insert a new goal. Fails with `Constraint` on a duplicate name key.
    async fn insert_goal(&self, goal: &Goal) -> Result<(), DatabaseError>;

    /// Find a goal by id.
    async fn get_goal(&self, id: GoalId) -> Result<Option<Goal>, DatabaseError>;

    /// All goals owned by `owner_id`, oldest first.
    async fn list_goals(&self, owner_id: &str) -> Result<Vec<Goal>, DatabaseError>;

    /// Apply a partial update. Returns `false` if no such goal.
    async fn update_goal(&self, id: GoalId, patch: &GoalPatch) -> Result<bool, DatabaseError>;

    /// Delete a goal. Returns `false` if it was already gone.
    async fn delete_goal(&self, id: GoalId) -> Result<bool, DatabaseError>;
}
