//! Goals: data model, streak engine, and lifecycle operations.

pub mod locks;
pub mod model;
pub mod service;
pub mod streak;

pub use locks::KeyedLocks;
pub use model::{Goal, GoalId, LogEntry, MAX_GOALS, MAX_LOG_LEN, MAX_NAME_LEN};
pub use service::GoalService;
pub use streak::{Moment, StreakDecision, StreakEvent, StreakOutcome};
