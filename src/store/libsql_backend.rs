//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::conversation::state::{User, UserMode};
use crate::error::DatabaseError;
use crate::goals::model::{Goal, GoalId, LogEntry};
use crate::store::migrations;
use crate::store::traits::{Database, GoalPatch, UserPatch};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn text(row: &libsql::Row, idx: i32, what: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{what}: {e}")))
}

fn int(row: &libsql::Row, idx: i32, what: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{what}: {e}")))
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Split constraint failures out of generic query errors.
fn classify(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else if msg.contains("FOREIGN KEY constraint failed") {
        DatabaseError::ForeignKey(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

const USER_COLUMNS: &str = "sender_id, mode, mode_goal_id, goal_count, finished_goals, last_motivation_index, created_at, updated_at";

const GOAL_COLUMNS: &str = "id, owner_id, name, streak, total, log, last_update_at, last_update_weekday, created_at, updated_at";

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let mode_tag = text(row, 1, "user.mode")?;
    let mode_goal: Option<String> = row.get(2).ok();
    let mode_goal = mode_goal.and_then(|s| s.parse::<GoalId>().ok());
    let finished_raw = text(row, 4, "user.finished_goals")?;
    let created = text(row, 6, "user.created_at")?;
    let updated = text(row, 7, "user.updated_at")?;

    Ok(User {
        sender_id: text(row, 0, "user.sender_id")?,
        mode: UserMode::from_parts(&mode_tag, mode_goal),
        goal_count: int(row, 3, "user.goal_count")?.max(0) as u32,
        finished_goals: from_json(&finished_raw, "user.finished_goals")?,
        last_motivation_index: int(row, 5, "user.last_motivation_index")?.max(0) as u32,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a Goal. Column order matches GOAL_COLUMNS.
fn row_to_goal(row: &libsql::Row) -> Result<Goal, DatabaseError> {
    let id_str = text(row, 0, "goal.id")?;
    let id = id_str
        .parse::<GoalId>()
        .map_err(|e| DatabaseError::Query(format!("goal.id parse: {e}")))?;
    let log_raw = text(row, 5, "goal.log")?;
    let log: Vec<LogEntry> = from_json(&log_raw, "goal.log")?;
    let last_update: Option<String> = row.get(6).ok();
    let last_weekday: Option<i64> = row.get(7).ok();
    let created = text(row, 8, "goal.created_at")?;
    let updated = text(row, 9, "goal.updated_at")?;

    Ok(Goal {
        id,
        owner_id: text(row, 1, "goal.owner_id")?,
        name: text(row, 2, "goal.name")?,
        streak: int(row, 3, "goal.streak")?.max(0) as u32,
        total: int(row, 4, "goal.total")?.max(0) as u32,
        log,
        last_update_at: last_update.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s)),
        last_update_weekday: last_weekday.map(|d| d.clamp(0, 6) as u32),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, sender_id: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE sender_id = ?1"),
                params![sender_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user row: {e}"))),
        }
    }

    async fn insert_user(&self, user: &User) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    user.sender_id.as_str(),
                    user.mode.tag(),
                    opt_text(user.mode.goal_id().map(|id| id.to_string())),
                    i64::from(user.goal_count),
                    to_json(&user.finished_goals)?,
                    i64::from(user.last_motivation_index),
                    user.created_at.to_rfc3339(),
                    user.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_user: {e}")))?;

        if count > 0 {
            debug!(sender = %user.sender_id, "User created");
        }
        Ok(count > 0)
    }

    async fn update_user(
        &self,
        sender_id: &str,
        patch: &UserPatch,
    ) -> Result<bool, DatabaseError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(mode) = patch.mode {
            sets.push("mode = ?");
            values.push(libsql::Value::Text(mode.tag().to_string()));
            sets.push("mode_goal_id = ?");
            values.push(opt_text(mode.goal_id().map(|id| id.to_string())));
        }
        if let Some(count) = patch.goal_count {
            sets.push("goal_count = ?");
            values.push(libsql::Value::Integer(i64::from(count)));
        }
        if let Some(ref finished) = patch.finished_goals {
            sets.push("finished_goals = ?");
            values.push(libsql::Value::Text(to_json(finished)?));
        }
        if let Some(index) = patch.last_motivation_index {
            sets.push("last_motivation_index = ?");
            values.push(libsql::Value::Integer(i64::from(index)));
        }
        sets.push("updated_at = ?");
        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));
        values.push(libsql::Value::Text(sender_id.to_string()));

        let sql = format!("UPDATE users SET {} WHERE sender_id = ?", sets.join(", "));
        let count = self
            .conn()
            .execute(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_user: {e}")))?;
        Ok(count > 0)
    }

    // ── Goals ───────────────────────────────────────────────────────

    async fn insert_goal(&self, goal: &Goal) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO goals (id, owner_id, name, name_key, streak, total, log, last_update_at, last_update_weekday, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    goal.id.to_string(),
                    goal.owner_id.as_str(),
                    goal.name.as_str(),
                    goal.name_key(),
                    i64::from(goal.streak),
                    i64::from(goal.total),
                    to_json(&goal.log)?,
                    opt_text(goal.last_update_at.map(|d| d.to_rfc3339())),
                    match goal.last_update_weekday {
                        Some(d) => libsql::Value::Integer(i64::from(d)),
                        None => libsql::Value::Null,
                    },
                    goal.created_at.to_rfc3339(),
                    goal.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| classify("insert_goal", e))?;
        debug!(id = %goal.id, owner = %goal.owner_id, "Goal created");
        Ok(())
    }

    async fn get_goal(&self, id: GoalId) -> Result<Option<Goal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_goal: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_goal(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_goal row: {e}"))),
        }
    }

    async fn list_goals(&self, owner_id: &str) -> Result<Vec<Goal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {GOAL_COLUMNS} FROM goals WHERE owner_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_goals: {e}")))?;

        let mut goals = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_goals row: {e}")))?
        {
            goals.push(row_to_goal(&row)?);
        }
        Ok(goals)
    }

    async fn update_goal(&self, id: GoalId, patch: &GoalPatch) -> Result<bool, DatabaseError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(streak) = patch.streak {
            sets.push("streak = ?");
            values.push(libsql::Value::Integer(i64::from(streak)));
        }
        if let Some(total) = patch.total {
            sets.push("total = ?");
            values.push(libsql::Value::Integer(i64::from(total)));
        }
        if let Some(ref log) = patch.log {
            sets.push("log = ?");
            values.push(libsql::Value::Text(to_json(log)?));
        }
        if let Some(at) = patch.last_update_at {
            sets.push("last_update_at = ?");
            values.push(libsql::Value::Text(at.to_rfc3339()));
        }
        if let Some(weekday) = patch.last_update_weekday {
            sets.push("last_update_weekday = ?");
            values.push(libsql::Value::Integer(i64::from(weekday)));
        }
        sets.push("updated_at = ?");
        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));
        values.push(libsql::Value::Text(id.to_string()));

        let sql = format!("UPDATE goals SET {} WHERE id = ?", sets.join(", "));
        let count = self
            .conn()
            .execute(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_goal: {e}")))?;
        Ok(count > 0)
    }

    async fn delete_goal(&self, id: GoalId) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM goals WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_goal: {e}")))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    /// A store with users "1001" and "2002" already present.
    async fn test_db_with_owners() -> LibSqlBackend {
        let db = test_db().await;
        for sender in ["1001", "2002"] {
            db.insert_user(&User::new(sender)).await.unwrap();
        }
        db
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_user() {
        let db = test_db().await;
        let user = User::new("1001");
        assert!(db.insert_user(&user).await.unwrap());

        let fetched = db.get_user("1001").await.unwrap().unwrap();
        assert_eq!(fetched.sender_id, "1001");
        assert_eq!(fetched.mode, UserMode::Idle);
        assert_eq!(fetched.goal_count, 0);
        assert!(fetched.finished_goals.is_empty());
    }

    #[tokio::test]
    async fn insert_user_twice_is_ignored() {
        let db = test_db().await;
        assert!(db.insert_user(&User::new("1001")).await.unwrap());
        db.update_user(
            "1001",
            &UserPatch {
                goal_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // A redelivered first contact must not reset the record.
        assert!(!db.insert_user(&User::new("1001")).await.unwrap());
        let fetched = db.get_user("1001").await.unwrap().unwrap();
        assert_eq!(fetched.goal_count, 2);
    }

    #[tokio::test]
    async fn get_user_not_found() {
        let db = test_db().await;
        assert!(db.get_user("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_user_update_only_touches_given_fields() {
        let db = test_db().await;
        db.insert_user(&User::new("1001")).await.unwrap();
        let goal = GoalId::new();

        db.update_user("1001", &UserPatch::mode(UserMode::LoggingProgress(goal)))
            .await
            .unwrap();
        db.update_user(
            "1001",
            &UserPatch {
                finished_goals: Some(vec!["Run: 3 check-ins".into()]),
                last_motivation_index: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let fetched = db.get_user("1001").await.unwrap().unwrap();
        assert_eq!(fetched.mode, UserMode::LoggingProgress(goal));
        assert_eq!(fetched.finished_goals, vec!["Run: 3 check-ins".to_string()]);
        assert_eq!(fetched.last_motivation_index, 4);
        assert_eq!(fetched.goal_count, 0);
    }

    #[tokio::test]
    async fn update_missing_user_reports_false() {
        let db = test_db().await;
        let updated = db
            .update_user("ghost", &UserPatch::mode(UserMode::NamingGoal))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn mode_back_to_idle_clears_goal_column() {
        let db = test_db().await;
        db.insert_user(&User::new("1001")).await.unwrap();
        db.update_user("1001", &UserPatch::mode(UserMode::LoggingProgress(GoalId::new())))
            .await
            .unwrap();
        db.update_user("1001", &UserPatch::mode(UserMode::Idle))
            .await
            .unwrap();

        let mut rows = db
            .conn()
            .query("SELECT mode_goal_id FROM users WHERE sender_id = '1001'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert!(row.get::<String>(0).is_err(), "mode_goal_id should be NULL");
    }

    // ── Goal tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_goal() {
        let db = test_db_with_owners().await;
        let goal = Goal::new("1001", "Run");
        db.insert_goal(&goal).await.unwrap();

        let fetched = db.get_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, goal.id);
        assert_eq!(fetched.name, "Run");
        assert_eq!(fetched.streak, 0);
        assert!(fetched.last_update_at.is_none());
        assert!(fetched.last_update_weekday.is_none());
    }

    #[tokio::test]
    async fn get_goal_not_found() {
        let db = test_db().await;
        assert!(db.get_goal(GoalId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_key_is_constraint_error() {
        let db = test_db_with_owners().await;
        db.insert_goal(&Goal::new("1001", "Run")).await.unwrap();
        let err = db.insert_goal(&Goal::new("1001", "RUN")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");

        // Another owner may reuse the name.
        db.insert_goal(&Goal::new("2002", "Run")).await.unwrap();
    }

    #[tokio::test]
    async fn goal_for_unknown_owner_is_foreign_key_error() {
        let db = test_db().await;
        let err = db.insert_goal(&Goal::new("ghost", "Run")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::ForeignKey(_)), "got {err:?}");
        assert!(db.list_goals("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_goals_by_owner_in_creation_order() {
        let db = test_db_with_owners().await;
        let a = Goal::new("1001", "Alpha");
        let b = Goal::new("1001", "Beta");
        let other = Goal::new("2002", "Gamma");
        for g in [&a, &b, &other] {
            db.insert_goal(g).await.unwrap();
        }

        let goals = db.list_goals("1001").await.unwrap();
        let names: Vec<&str> = goals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
        assert!(db.list_goals("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_goal_update() {
        let db = test_db_with_owners().await;
        let goal = Goal::new("1001", "Run");
        db.insert_goal(&goal).await.unwrap();

        let at = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let entry = LogEntry {
            date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            text: "5k easy".into(),
        };
        let updated = db
            .update_goal(
                goal.id,
                &GoalPatch {
                    streak: Some(2),
                    total: Some(7),
                    log: Some(vec![entry.clone()]),
                    last_update_at: Some(at),
                    last_update_weekday: Some(3),
                },
            )
            .await
            .unwrap();
        assert!(updated);

        let fetched = db.get_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.streak, 2);
        assert_eq!(fetched.total, 7);
        assert_eq!(fetched.log, vec![entry]);
        assert_eq!(fetched.last_update_at, Some(at));
        assert_eq!(fetched.last_update_weekday, Some(3));

        // Streak-only patch leaves the rest alone.
        db.update_goal(
            goal.id,
            &GoalPatch {
                streak: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let fetched = db.get_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.streak, 0);
        assert_eq!(fetched.total, 7);
    }

    #[tokio::test]
    async fn delete_goal_twice() {
        let db = test_db_with_owners().await;
        let goal = Goal::new("1001", "Run");
        db.insert_goal(&goal).await.unwrap();
        assert!(db.delete_goal(goal.id).await.unwrap());
        assert!(!db.delete_goal(goal.id).await.unwrap());
        assert!(!db.update_goal(goal.id, &GoalPatch::default()).await.unwrap());
    }

    #[tokio::test]
    async fn local_file_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("bot.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_user(&User::new("1001")).await.unwrap();
        }
        assert!(path.exists());
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_user("1001").await.unwrap().is_some());
    }
}
