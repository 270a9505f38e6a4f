//! GoalService: goal lifecycle operations over the store.
//!
//! Each operation is a short sequential pipeline: read, decide, write.
//! Goal read-modify-write runs under a per-goal lock. User-record updates
//! (goal count, finished list) rely on the caller holding the sender lock.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tracing::{debug, info};

use crate::error::{DatabaseError, GoalError, ValidationError};
use crate::store::{Database, GoalPatch, UserPatch};

use super::locks::KeyedLocks;
use super::model::{Goal, GoalId, LogEntry, MAX_GOALS, validate_log_text, validate_name};
use super::streak::{self, Moment, StreakEvent};

/// Coordinates goal creation, streak recomputation, progress logging,
/// finishing and deletion.
pub struct GoalService {
    db: Arc<dyn Database>,
    goal_locks: KeyedLocks<GoalId>,
    offset: FixedOffset,
}

impl GoalService {
    pub fn new(db: Arc<dyn Database>, offset: FixedOffset) -> Self {
        Self {
            db,
            goal_locks: KeyedLocks::new(),
            offset,
        }
    }

    /// Resolve a UTC instant into a [`Moment`] in the configured offset.
    pub fn moment(&self, at: chrono::DateTime<chrono::Utc>) -> Moment {
        Moment::new(at, self.offset)
    }

    fn local_date(&self, now: Moment) -> NaiveDate {
        now.at.with_timezone(&self.offset).date_naive()
    }

    /// Fail with `GoalLimitReached` if the owner is at the cap.
    pub async fn ensure_capacity(&self, owner_id: &str) -> Result<(), GoalError> {
        let live = self.db.list_goals(owner_id).await?;
        if live.len() >= MAX_GOALS {
            return Err(ValidationError::GoalLimitReached { max: MAX_GOALS }.into());
        }
        Ok(())
    }

    /// Validate `raw_name` and create the goal. Increments the owner's
    /// goal count. Rejections leave the store untouched.
    pub async fn create_goal(&self, owner_id: &str, raw_name: &str) -> Result<Goal, GoalError> {
        let user = self
            .db
            .get_user(owner_id)
            .await?
            .ok_or_else(|| GoalError::UserNotFound {
                sender: owner_id.to_string(),
            })?;

        let live = self.db.list_goals(owner_id).await?;
        if live.len() >= MAX_GOALS {
            return Err(ValidationError::GoalLimitReached { max: MAX_GOALS }.into());
        }
        let name = validate_name(raw_name, &live)?;

        let goal = Goal::new(owner_id, name);
        match self.db.insert_goal(&goal).await {
            Ok(()) => {}
            // Lost a race with an identical name.
            Err(DatabaseError::Constraint(_)) => {
                return Err(ValidationError::DuplicateName { name: goal.name }.into());
            }
            Err(DatabaseError::ForeignKey(_)) => {
                return Err(GoalError::UserNotFound {
                    sender: owner_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.db
            .update_user(
                owner_id,
                &UserPatch {
                    goal_count: Some(user.goal_count.saturating_add(1)),
                    ..Default::default()
                },
            )
            .await?;

        info!(sender = %owner_id, goal_id = %goal.id, name = %goal.name, "Goal created");
        Ok(goal)
    }

    /// Fetch a goal as stored, without recomputing its streak.
    pub async fn goal(&self, owner_id: &str, id: GoalId) -> Result<Goal, GoalError> {
        self.owned_goal(owner_id, id).await
    }

    /// Load a goal owned by `owner_id`. Another owner's goal is reported as
    /// not found.
    async fn owned_goal(&self, owner_id: &str, id: GoalId) -> Result<Goal, GoalError> {
        match self.db.get_goal(id).await? {
            Some(goal) if goal.owner_id == owner_id => Ok(goal),
            _ => Err(GoalError::NotFound { id }),
        }
    }

    /// Recompute one goal's streak for display. Persists only when the
    /// engine reports a change (a reset).
    pub async fn view_goal(
        &self,
        owner_id: &str,
        id: GoalId,
        now: Moment,
    ) -> Result<Goal, GoalError> {
        let _guard = self.goal_locks.lock(&id).await;
        let mut goal = self.owned_goal(owner_id, id).await?;
        self.refresh(&mut goal, now).await?;
        Ok(goal)
    }

    /// All of the owner's goals, oldest first, each recomputed for display.
    pub async fn view_all(&self, owner_id: &str, now: Moment) -> Result<Vec<Goal>, GoalError> {
        let goals = self.db.list_goals(owner_id).await?;
        let mut out = Vec::with_capacity(goals.len());
        for goal in goals {
            let _guard = self.goal_locks.lock(&goal.id).await;
            // Re-read under the lock; the listed copy may be stale.
            let Some(mut fresh) = self.db.get_goal(goal.id).await? else {
                continue;
            };
            self.refresh(&mut fresh, now).await?;
            out.push(fresh);
        }
        Ok(out)
    }

    async fn refresh(&self, goal: &mut Goal, now: Moment) -> Result<(), GoalError> {
        let outcome = streak::evaluate(goal, StreakEvent::View, now);
        if !outcome.changes(goal) {
            return Ok(());
        }
        debug!(goal_id = %goal.id, from = goal.streak, to = outcome.streak, "Streak decayed");
        streak::apply(goal, &outcome);
        let patch = GoalPatch {
            streak: Some(outcome.streak),
            ..Default::default()
        };
        if !self.db.update_goal(goal.id, &patch).await? {
            return Err(GoalError::NotFound { id: goal.id });
        }
        Ok(())
    }

    /// Record a progress note: validate, run the engine in progress mode,
    /// prepend the entry and persist. Returns the updated goal.
    pub async fn log_progress(
        &self,
        owner_id: &str,
        id: GoalId,
        raw_text: &str,
        now: Moment,
    ) -> Result<Goal, GoalError> {
        let text = validate_log_text(raw_text)?;

        let _guard = self.goal_locks.lock(&id).await;
        let mut goal = self.owned_goal(owner_id, id).await?;
        let now = now.not_before(&goal);

        let outcome = streak::evaluate(&goal, StreakEvent::Progress, now);
        streak::apply(&mut goal, &outcome);
        goal.log.insert(
            0,
            LogEntry {
                date: self.local_date(now),
                text,
            },
        );

        let patch = GoalPatch {
            streak: Some(goal.streak),
            total: Some(goal.total),
            log: Some(goal.log.clone()),
            last_update_at: goal.last_update_at,
            last_update_weekday: goal.last_update_weekday,
        };
        if !self.db.update_goal(id, &patch).await? {
            return Err(GoalError::NotFound { id });
        }

        info!(
            goal_id = %id,
            decision = ?outcome.decision,
            streak = goal.streak,
            total = goal.total,
            "Progress logged"
        );
        Ok(goal)
    }

    /// Finish a goal: prepend its summary to the owner's finished list,
    /// delete it, and decrement the goal count. Returns the summary.
    pub async fn finish_goal(
        &self,
        owner_id: &str,
        id: GoalId,
        now: Moment,
    ) -> Result<String, GoalError> {
        let _guard = self.goal_locks.lock(&id).await;
        let mut goal = self.owned_goal(owner_id, id).await?;
        self.refresh(&mut goal, now).await?;
        let user = self
            .db
            .get_user(owner_id)
            .await?
            .ok_or_else(|| GoalError::UserNotFound {
                sender: owner_id.to_string(),
            })?;

        if !self.db.delete_goal(id).await? {
            return Err(GoalError::NotFound { id });
        }

        let summary = goal.finish_summary(self.local_date(now));
        let mut finished = user.finished_goals;
        finished.insert(0, summary.clone());
        self.db
            .update_user(
                owner_id,
                &UserPatch {
                    goal_count: Some(user.goal_count.saturating_sub(1)),
                    finished_goals: Some(finished),
                    ..Default::default()
                },
            )
            .await?;

        info!(sender = %owner_id, goal_id = %id, "Goal finished");
        Ok(summary)
    }

    /// Delete a goal and decrement the goal count. A goal that is already
    /// gone yields `NotFound`, which callers treat as a no-op.
    pub async fn delete_goal(&self, owner_id: &str, id: GoalId) -> Result<Goal, GoalError> {
        let _guard = self.goal_locks.lock(&id).await;
        let goal = self.owned_goal(owner_id, id).await?;

        if !self.db.delete_goal(id).await? {
            return Err(GoalError::NotFound { id });
        }

        if let Some(user) = self.db.get_user(owner_id).await? {
            self.db
                .update_user(
                    owner_id,
                    &UserPatch {
                        goal_count: Some(user.goal_count.saturating_sub(1)),
                        ..Default::default()
                    },
                )
                .await?;
        }

        info!(sender = %owner_id, goal_id = %id, "Goal deleted");
        Ok(goal)
    }
}
