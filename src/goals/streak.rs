//! Streak engine: decides whether an event extends, holds, or resets a
//! goal's run of consecutive days.
//!
//! The engine is a pure function of the stored goal state, the event kind
//! and the current [`Moment`]. Evaluating the same inputs twice gives the
//! same answer, and a second `Progress` at the same moment lands in the
//! hold branch, so replays never double-count the streak.

use chrono::{DateTime, Datelike, FixedOffset, Utc};

use super::model::Goal;

/// Two calendar days, the longest gap that still counts as "yesterday".
pub const EXTEND_WINDOW_SECS: i64 = 172_800;
/// One calendar day, the longest gap that can still be "today".
pub const HOLD_WINDOW_SECS: i64 = 86_400;

/// What caused the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakEvent {
    /// The goal is being looked at. Never credits activity.
    View,
    /// The user logged progress.
    Progress,
}

impl StreakEvent {
    pub fn increment(self) -> u32 {
        match self {
            Self::View => 0,
            Self::Progress => 1,
        }
    }
}

/// Which branch of the rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakDecision {
    Extend,
    Hold,
    Reset,
}

/// A point in time plus the local day of week it falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub at: DateTime<Utc>,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u32,
}

impl Moment {
    /// Resolve `at` against a local offset.
    pub fn new(at: DateTime<Utc>, offset: FixedOffset) -> Self {
        let weekday = at.with_timezone(&offset).weekday().num_days_from_sunday();
        Self { at, weekday }
    }

    /// The current moment in the given offset.
    pub fn now(offset: FixedOffset) -> Self {
        Self::new(Utc::now(), offset)
    }

    /// `self`, or the goal's last update if that is later. Events can be
    /// processed out of order; time never runs backwards for a goal.
    pub fn not_before(self, goal: &Goal) -> Self {
        match (goal.last_update_at, goal.last_update_weekday) {
            (Some(at), Some(weekday)) if at > self.at => Self { at, weekday },
            _ => self,
        }
    }
}

/// Result of evaluating one event. Fields are the values to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakOutcome {
    pub decision: StreakDecision,
    pub streak: u32,
    pub total: u32,
    /// Set only for `Progress`: the new last-update moment.
    pub touched: Option<Moment>,
}

impl StreakOutcome {
    /// Whether persisting this outcome would change the stored goal.
    pub fn changes(&self, goal: &Goal) -> bool {
        self.touched.is_some() || self.streak != goal.streak || self.total != goal.total
    }
}

/// Weekday difference `now - last`, in -6..=6.
pub fn day_delta(now_weekday: u32, last_weekday: u32) -> i64 {
    i64::from(now_weekday) - i64::from(last_weekday)
}

/// Apply the decision rule to raw inputs.
pub fn decide(day_delta: i64, elapsed_secs: i64) -> StreakDecision {
    let next_day = day_delta == 1 || day_delta == -6;
    if next_day && elapsed_secs < EXTEND_WINDOW_SECS {
        StreakDecision::Extend
    } else if day_delta == 0 && elapsed_secs < HOLD_WINDOW_SECS {
        StreakDecision::Hold
    } else {
        StreakDecision::Reset
    }
}

/// Evaluate `event` against `goal` at `now`.
pub fn evaluate(goal: &Goal, event: StreakEvent, now: Moment) -> StreakOutcome {
    let increment = event.increment();
    let now = now.not_before(goal);

    let decision = match (goal.last_update_at, goal.last_update_weekday) {
        (Some(last_at), Some(last_weekday)) => {
            let elapsed = (now.at - last_at).num_seconds();
            decide(day_delta(now.weekday, last_weekday), elapsed)
        }
        // Never logged: nothing to continue.
        _ => StreakDecision::Reset,
    };

    let streak = match decision {
        StreakDecision::Extend => goal.streak.saturating_add(increment),
        StreakDecision::Hold => goal.streak.max(increment),
        StreakDecision::Reset => increment,
    };

    match event {
        StreakEvent::Progress => StreakOutcome {
            decision,
            streak,
            total: goal.total.saturating_add(increment),
            touched: Some(now),
        },
        // A view only ever shows decay; extend/hold with a zero increment
        // leave the streak where it was anyway.
        StreakEvent::View => StreakOutcome {
            decision,
            streak: if decision == StreakDecision::Reset {
                streak
            } else {
                goal.streak
            },
            total: goal.total,
            touched: None,
        },
    }
}

/// Write an outcome back onto an in-memory goal.
pub fn apply(goal: &mut Goal, outcome: &StreakOutcome) {
    goal.streak = outcome.streak;
    goal.total = outcome.total;
    if let Some(moment) = outcome.touched {
        goal.last_update_at = Some(moment.at);
        goal.last_update_weekday = Some(moment.weekday);
    }
}
