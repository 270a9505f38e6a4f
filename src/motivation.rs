//! Motivational content sent after each progress log.

use std::path::Path;

use crate::error::ConfigError;

/// A source of motivational lines, addressed by a per-user cursor.
pub trait MotivationFeed: Send + Sync {
    /// Number of lines available. Always at least one.
    fn len(&self) -> usize;

    /// The line for `index`, wrapping around the feed.
    fn line(&self, index: u32) -> &str;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const BUILT_IN: &[&str] = &[
    "Small steps every day add up to big results.",
    "You showed up today. That is the hard part.",
    "Consistency beats intensity. Keep the chain going.",
    "Progress, not perfection.",
    "Every check-in is a vote for the person you want to become.",
    "The best time to start was yesterday. The next best time is now.",
    "Don't break the chain!",
    "Motivation gets you going, habit keeps you going.",
];

/// A fixed list of lines, built in or loaded from a JSON array file.
#[derive(Debug, Clone)]
pub struct StaticMotivationFeed {
    lines: Vec<String>,
}

impl StaticMotivationFeed {
    /// The built-in lines.
    pub fn built_in() -> Self {
        Self {
            lines: BUILT_IN.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Use the given lines. Blank entries are dropped; an empty result falls
    /// back to the built-in lines.
    pub fn from_lines(lines: Vec<String>) -> Self {
        let lines: Vec<String> = lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return Self::built_in();
        }
        Self { lines }
    }

    /// Load a JSON array of strings.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let lines: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "STREAK_BOT_MOTIVATION_FILE".to_string(),
                message: format!("{}: {e}", path.display()),
            })?;
        tracing::info!(path = %path.display(), count = lines.len(), "Loaded motivation feed");
        Ok(Self::from_lines(lines))
    }
}

impl Default for StaticMotivationFeed {
    fn default() -> Self {
        Self::built_in()
    }
}

impl MotivationFeed for StaticMotivationFeed {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, index: u32) -> &str {
        &self.lines[index as usize % self.lines.len()]
    }
}
