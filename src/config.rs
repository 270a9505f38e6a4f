//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Graph API version used by the Send API client.
pub const DEFAULT_GRAPH_API_VERSION: &str = "v19.0";

/// Runtime configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// HTTP listen port for the webhook server.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Page access token for the Send API.
    pub page_access_token: SecretString,
    /// App secret used to verify `X-Hub-Signature-256`.
    pub app_secret: SecretString,
    /// Token expected in the subscription handshake.
    pub verify_token: String,
    /// Graph API version path segment, e.g. `v19.0`.
    pub graph_api_version: String,
    /// Local offset used to decide which calendar day an event falls on.
    pub utc_offset: FixedOffset,
    /// Processing budget for one webhook delivery.
    pub event_budget: Duration,
    /// Optional JSON file with motivational lines.
    pub motivation_file: Option<PathBuf>,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let port: u16 = parse_or(&lookup, "STREAK_BOT_PORT", 5000)?;
        let offset_minutes: i32 = parse_or(&lookup, "STREAK_BOT_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "STREAK_BOT_UTC_OFFSET_MINUTES".into(),
                message: format!("{offset_minutes} minutes is out of range"),
            }
        })?;
        let budget_secs: u64 = parse_or(&lookup, "STREAK_BOT_EVENT_BUDGET_SECS", 20)?;

        Ok(Self {
            port,
            db_path: lookup("STREAK_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/streak-bot.db")),
            page_access_token: SecretString::from(required("PAGE_ACCESS_TOKEN")?),
            app_secret: SecretString::from(required("APP_SECRET")?),
            verify_token: required("VERIFY_TOKEN")?,
            graph_api_version: lookup("GRAPH_API_VERSION")
                .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            utc_offset,
            event_budget: Duration::from_secs(budget_secs),
            motivation_file: lookup("STREAK_BOT_MOTIVATION_FILE").map(PathBuf::from),
            log_dir: lookup("STREAK_BOT_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("PAGE_ACCESS_TOKEN", "page-token"),
        ("APP_SECRET", "app-secret"),
        ("VERIFY_TOKEN", "verify-me"),
    ];

    #[test]
    fn defaults_apply_when_only_required_set() {
        let config = BotConfig::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from("./data/streak-bot.db"));
        assert_eq!(config.graph_api_version, DEFAULT_GRAPH_API_VERSION);
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
        assert_eq!(config.event_budget, Duration::from_secs(20));
        assert!(config.motivation_file.is_none());
        assert_eq!(config.page_access_token.expose_secret(), "page-token");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = BotConfig::from_lookup(lookup_from(&[("VERIFY_TOKEN", "v")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "PAGE_ACCESS_TOKEN"));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[2] = ("VERIFY_TOKEN", "   ");
        let err = BotConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "VERIFY_TOKEN"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STREAK_BOT_PORT", "not-a-port"));
        let err = BotConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "STREAK_BOT_PORT"));
    }

    #[test]
    fn utc_offset_in_minutes() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STREAK_BOT_UTC_OFFSET_MINUTES", "-300"));
        let config = BotConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.utc_offset.local_minus_utc(), -300 * 60);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("STREAK_BOT_UTC_OFFSET_MINUTES", "100000"));
        assert!(BotConfig::from_lookup(lookup_from(&pairs)).is_err());
    }
}
