//! Goal data model: goals, log entries, and naming rules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum number of live goals per user.
pub const MAX_GOALS: usize = 5;
/// Maximum goal name length, in characters.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum progress note length, in characters.
pub const MAX_LOG_LEN: usize = 96;

/// Goal identifier.
///
/// Rendered as a hyphenated UUID, which never starts with a space and so
/// cannot collide with the padding in fixed-width action payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub Uuid);

impl GoalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GoalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GoalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One progress note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub date: NaiveDate,
    pub text: String,
}

/// A tracked goal owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    /// Sender id of the owning user.
    pub owner_id: String,
    /// Display name, already normalized.
    pub name: String,
    /// Current run of consecutive days.
    pub streak: u32,
    /// Every progress event ever logged.
    pub total: u32,
    /// Newest first.
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_at: Option<DateTime<Utc>>,
    /// Day of week of the last progress event, 0 = Sunday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_weekday: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a fresh goal with no progress. `name` must already be normalized.
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: GoalId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            streak: 0,
            total: 0,
            log: Vec::new(),
            last_update_at: None,
            last_update_weekday: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Key used for per-owner uniqueness.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }

    /// One-line record kept on the user after the goal is finished.
    pub fn finish_summary(&self, finished_on: NaiveDate) -> String {
        format!(
            "{}: {} check-ins, final streak {}, finished {}",
            self.name,
            self.total,
            self.streak,
            finished_on.format("%Y-%m-%d")
        )
    }
}

/// Trim and capitalize the first letter of a goal name.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Case-insensitive comparison key for a goal name.
pub fn name_key(name: &str) -> String {
    normalize_name(name).to_lowercase()
}

/// Validate a proposed name against the length limit and the owner's
/// existing goals. Returns the normalized name.
pub fn validate_name<'a, I>(raw: &str, existing: I) -> Result<String, ValidationError>
where
    I: IntoIterator<Item = &'a Goal>,
{
    let name = normalize_name(raw);
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            len,
            max: MAX_NAME_LEN,
        });
    }
    let key = name_key(&name);
    if existing.into_iter().any(|g| g.name_key() == key) {
        return Err(ValidationError::DuplicateName { name });
    }
    Ok(name)
}

/// Validate a progress note. Returns the trimmed text.
pub fn validate_log_text(raw: &str) -> Result<String, ValidationError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyLog);
    }
    let len = text.chars().count();
    if len > MAX_LOG_LEN {
        return Err(ValidationError::LogTooLong {
            len,
            max: MAX_LOG_LEN,
        });
    }
    Ok(text.to_string())
}
