//! Configuration loading from `ledger.toml`.

use std::path::Path;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::week::WeekWindow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub week: WeekConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Where the weekly boundary falls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekConfig {
    /// Fixed offset such as "+09:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    #[serde(default = "default_boundary_day")]
    pub boundary_day: String,

    #[serde(default = "default_boundary_hour")]
    pub boundary_hour: u32,
}

impl Default for WeekConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
            boundary_day: default_boundary_day(),
            boundary_hour: default_boundary_hour(),
        }
    }
}

fn default_utc_offset() -> String {
    "+09:00".to_string()
}

fn default_boundary_day() -> String {
    "Mon".to_string()
}

fn default_boundary_hour() -> u32 {
    9
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Ceiling for the weekly ratio on the radar view.
    #[serde(default = "default_weekly_cap")]
    pub weekly_cap: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            weekly_cap: default_weekly_cap(),
        }
    }
}

fn default_weekly_cap() -> f64 {
    1.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Substrings that tag a new assignment as exam-type.
    #[serde(default = "default_exam_markers")]
    pub exam_markers: Vec<String>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            exam_markers: default_exam_markers(),
        }
    }
}

fn default_exam_markers() -> Vec<String> {
    vec!["시험".to_string(), "Test".to_string()]
}

impl Config {
    /// Missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.week_window()?;
        if config.display.weekly_cap <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "display.weekly_cap must be positive, got {}",
                config.display.weekly_cap
            )));
        }
        Ok(config)
    }

    pub fn week_window(&self) -> Result<WeekWindow> {
        let tz: FixedOffset = self.week.utc_offset.parse().map_err(|_| {
            Error::InvalidConfig(format!("week.utc_offset: {}", self.week.utc_offset))
        })?;
        let day: Weekday = self.week.boundary_day.parse().map_err(|_| {
            Error::InvalidConfig(format!("week.boundary_day: {}", self.week.boundary_day))
        })?;
        let time = NaiveTime::from_hms_opt(self.week.boundary_hour, 0, 0).ok_or_else(|| {
            Error::InvalidConfig(format!("week.boundary_hour: {}", self.week.boundary_hour))
        })?;
        Ok(WeekWindow::new(tz, day, time))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("ledger.toml")).expect("defaults");

        assert_eq!(config.week.utc_offset, "+09:00");
        assert_eq!(config.week.boundary_day, "Mon");
        assert_eq!(config.week.boundary_hour, 9);
        assert_eq!(config.store.timeout_secs, 10);
        assert_eq!(config.tasks.exam_markers, vec!["시험", "Test"]);
        assert_eq!(config.week_window().expect("window"), WeekWindow::default());
    }

    #[test]
    fn overrides_from_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ledger.toml");
        let toml = r#"
[week]
utc_offset = "+00:00"
boundary_day = "Sun"
boundary_hour = 18

[store]
timeout_secs = 3

[display]
weekly_cap = 1.25

[tasks]
exam_markers = ["Quiz"]
"#;
        fs::write(&path, toml)?;

        let config = Config::load(&path)?;
        assert_eq!(config.week.boundary_hour, 18);
        assert_eq!(config.store_timeout(), Duration::from_secs(3));
        assert_eq!(config.display.weekly_cap, 1.25);
        assert_eq!(config.tasks.exam_markers, vec!["Quiz"]);
        assert_eq!(config.store.max_connections, 5);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.toml");

        fs::write(&path, "[week]\nboundary_hour = 25\n").expect("write");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

        fs::write(&path, "[week]\nboundary_day = \"Someday\"\n").expect("write");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

        fs::write(&path, "[week\n").expect("write");
        assert!(matches!(Config::load(&path), Err(Error::TomlParse(_))));
    }
}
