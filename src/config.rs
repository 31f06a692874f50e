//! Configuration loader and validator for the attendance service.
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub attendance: Attendance,
    pub offline: Offline,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Overrides the `sqlite://{data_dir}/edutrack.db` default.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Attendance rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attendance {
    /// Non-teaching day of the week, resolved as a holiday in every calendar.
    pub weekly_holiday: Weekday,
    pub good_standing_threshold: u8,
    pub enforce_enrollment: bool,
    pub recent_history_limit: u32,
}

/// Client-local offline queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offline {
    pub queue_path: String,
    pub poll_interval_ms: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Database URL, honouring `DATABASE_URL` first.
    pub fn database_url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        match &self.app.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}/edutrack.db", self.app.resolved_data_dir()),
        }
    }

    pub fn queue_url(&self) -> String {
        format!("sqlite://{}", expand_home(&self.offline.queue_path))
    }
}

impl App {
    pub fn resolved_data_dir(&self) -> String {
        expand_home(&self.data_dir)
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }
    path.to_string()
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if let Some(url) = &cfg.app.database_url {
        if url.trim().is_empty() {
            return Err(ConfigError::Invalid("app.database_url must be non-empty when set"));
        }
    }

    if cfg.attendance.good_standing_threshold > 100 {
        return Err(ConfigError::Invalid(
            "attendance.good_standing_threshold must be within 0..=100",
        ));
    }
    if cfg.attendance.recent_history_limit == 0 {
        return Err(ConfigError::Invalid("attendance.recent_history_limit must be > 0"));
    }

    if cfg.offline.queue_path.trim().is_empty() {
        return Err(ConfigError::Invalid("offline.queue_path must be non-empty"));
    }
    if cfg.offline.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("offline.poll_interval_ms must be > 0"));
    }

    Ok(())
}

/// Reference configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

attendance:
  weekly_holiday: "Sun"
  good_standing_threshold: 75
  enforce_enrollment: true
  recent_history_limit: 5

offline:
  queue_path: "./data/pending.db"
  poll_interval_ms: 500
"#
}
