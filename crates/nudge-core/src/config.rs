//! Configuration system for nudge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::delivery::{PrioritySystemConfig, ReminderInjectionConfig};
use crate::error::{NudgeError, NudgeResult};
use crate::feedback::EffectivenessConfig;
use crate::learning::LearningConfig;

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    /// Injection cap, contextual matching and quiet hours.
    pub injection: ReminderInjectionConfig,
    /// Per-priority delivery policy.
    pub priorities: PrioritySystemConfig,
    /// Effectiveness weights and trend detection.
    pub effectiveness: EffectivenessConfig,
    /// Learning thresholds.
    pub learning: LearningConfig,
    /// Path to the reminder database.
    pub reminder_db_path: PathBuf,
    /// Path to the feedback database.
    pub feedback_db_path: PathBuf,
    /// Days of feedback events kept by cleanup.
    pub retention_days: u32,
}

fn nudge_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".nudge"))
        .unwrap_or_else(|| PathBuf::from(".nudge"))
}

impl Default for NudgeConfig {
    fn default() -> Self {
        let nudge_dir = nudge_dir();

        Self {
            injection: ReminderInjectionConfig::default(),
            priorities: PrioritySystemConfig::default(),
            effectiveness: EffectivenessConfig::default(),
            learning: LearningConfig::default(),
            reminder_db_path: nudge_dir.join("reminders.db"),
            feedback_db_path: nudge_dir.join("feedback.db"),
            retention_days: 90,
        }
    }
}

impl NudgeConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> NudgeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| NudgeError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| NudgeError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| NudgeError::Configuration(e.to_string()))?,
            _ => {
                return Err(NudgeError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Reads:
    /// - `NUDGE_REMINDER_DB_PATH`, `NUDGE_FEEDBACK_DB_PATH`
    /// - `NUDGE_RETENTION_DAYS` (default: 90)
    /// - `NUDGE_MAX_REMINDERS` (default: 3)
    /// - `NUDGE_MIN_CONTEXT_SCORE` (default: 0.7)
    /// - `NUDGE_QUIET_HOURS_START`, `NUDGE_QUIET_HOURS_END` ("HH:MM")
    /// - `NUDGE_UTC_OFFSET_MINUTES` (default: 0)
    /// - `NUDGE_DISABLE_INJECTION`, `NUDGE_DISABLE_CONTEXTUAL` (presence disables)
    ///
    /// Values that fail to parse keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("NUDGE_REMINDER_DB_PATH") {
            config.reminder_db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("NUDGE_FEEDBACK_DB_PATH") {
            config.feedback_db_path = PathBuf::from(path);
        }
        if let Some(days) = lookup("NUDGE_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            config.retention_days = days;
        }

        // Injection
        if let Some(max) = lookup("NUDGE_MAX_REMINDERS").and_then(|v| v.parse().ok()) {
            config.injection.max_reminders = max;
        }
        if let Some(score) = lookup("NUDGE_MIN_CONTEXT_SCORE").and_then(|v| v.parse().ok()) {
            config.injection.min_context_score = score;
        }
        if let Some(start) = lookup("NUDGE_QUIET_HOURS_START") {
            config.injection.quiet_hours_start = Some(start);
        }
        if let Some(end) = lookup("NUDGE_QUIET_HOURS_END") {
            config.injection.quiet_hours_end = Some(end);
        }
        if let Some(offset) = lookup("NUDGE_UTC_OFFSET_MINUTES").and_then(|v| v.parse().ok()) {
            config.injection.utc_offset_minutes = offset;
            config.learning.utc_offset_minutes = offset;
        }
        if lookup("NUDGE_DISABLE_INJECTION").is_some() {
            config.injection.enabled = false;
        }
        if lookup("NUDGE_DISABLE_CONTEXTUAL").is_some() {
            config.injection.include_contextual = false;
        }

        config
    }

    /// Check every section.
    pub fn validate(&self) -> NudgeResult<()> {
        self.injection.validate()?;
        self.effectiveness.validate()?;
        self.learning.validate()?;
        if self.retention_days == 0 {
            return Err(NudgeError::validation_with_suggestion(
                "retention_days must be positive",
                "Use at least 1 day, the default is 90",
            ));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> NudgeConfigBuilder {
        NudgeConfigBuilder::default()
    }
}

/// Builder for NudgeConfig.
#[derive(Default)]
pub struct NudgeConfigBuilder {
    config: NudgeConfig,
}

impl NudgeConfigBuilder {
    /// Set injection configuration.
    pub fn injection(mut self, config: ReminderInjectionConfig) -> Self {
        self.config.injection = config;
        self
    }

    /// Set quiet hours, "HH:MM" to "HH:MM".
    pub fn quiet_hours(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.config.injection.quiet_hours_start = Some(start.into());
        self.config.injection.quiet_hours_end = Some(end.into());
        self
    }

    /// Set the local UTC offset used for quiet hours and time-of-day learnings.
    pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.config.injection.utc_offset_minutes = minutes;
        self.config.learning.utc_offset_minutes = minutes;
        self
    }

    /// Set priority policy.
    pub fn priorities(mut self, config: PrioritySystemConfig) -> Self {
        self.config.priorities = config;
        self
    }

    /// Set effectiveness model.
    pub fn effectiveness(mut self, config: EffectivenessConfig) -> Self {
        self.config.effectiveness = config;
        self
    }

    /// Set learning thresholds.
    pub fn learning(mut self, config: LearningConfig) -> Self {
        self.config.learning = config;
        self
    }

    /// Set reminder database path.
    pub fn reminder_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reminder_db_path = path.into();
        self
    }

    /// Set feedback database path.
    pub fn feedback_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.feedback_db_path = path.into();
        self
    }

    /// Set feedback retention.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.config.retention_days = days;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> NudgeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = NudgeConfig::default();
        assert_eq!(config.injection.max_reminders, 3);
        assert_eq!(config.retention_days, 90);
        assert!(config.reminder_db_path.ends_with(".nudge/reminders.db"));
        assert!(config.feedback_db_path.ends_with(".nudge/feedback.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let file = write_config(
            ".toml",
            r#"
retention_days = 30

[injection]
max_reminders = 5
quiet_hours_start = "22:00"
quiet_hours_end = "07:00"

[priorities.urgent]
bypass_quiet_hours = false
"#,
        );
        let config = NudgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.injection.max_reminders, 5);
        assert!(config.injection.include_contextual);
        assert_eq!(config.injection.quiet_hours_start.as_deref(), Some("22:00"));
        assert!(!config.priorities.urgent.bypass_quiet_hours);
        assert_eq!(config.effectiveness, EffectivenessConfig::default());
    }

    #[test]
    fn test_from_json_and_yaml_files() {
        let json = write_config(".json", r#"{"effectiveness": {"trend_epsilon": 0.05}}"#);
        let config = NudgeConfig::from_file(json.path()).unwrap();
        assert_eq!(config.effectiveness.trend_epsilon, 0.05);
        assert_eq!(config.effectiveness.completion_weight, 0.6);

        let yaml = write_config(".yaml", "learning:\n  min_showings: 5\n");
        let config = NudgeConfig::from_file(yaml.path()).unwrap();
        assert_eq!(config.learning.min_showings, 5);
    }

    #[test]
    fn test_from_file_rejects_bad_input() {
        let ini = write_config(".ini", "retention_days = 3");
        assert!(matches!(
            NudgeConfig::from_file(ini.path()),
            Err(NudgeError::Configuration(_))
        ));

        let bad_time = write_config(
            ".toml",
            "[injection]\nquiet_hours_start = \"9pm\"\nquiet_hours_end = \"07:00\"\n",
        );
        assert!(NudgeConfig::from_file(bad_time.path()).is_err());

        assert!(NudgeConfig::from_file("/nonexistent/nudge.toml").is_err());
    }

    #[test]
    fn test_from_env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("NUDGE_MAX_REMINDERS", "7"),
            ("NUDGE_QUIET_HOURS_START", "23:00"),
            ("NUDGE_QUIET_HOURS_END", "06:30"),
            ("NUDGE_UTC_OFFSET_MINUTES", "-300"),
            ("NUDGE_RETENTION_DAYS", "not-a-number"),
            ("NUDGE_DISABLE_CONTEXTUAL", "1"),
            ("NUDGE_FEEDBACK_DB_PATH", "/tmp/fb.db"),
        ]
        .into_iter()
        .collect();

        let config = NudgeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.injection.max_reminders, 7);
        assert_eq!(config.injection.quiet_hours_end.as_deref(), Some("06:30"));
        assert_eq!(config.injection.utc_offset_minutes, -300);
        assert_eq!(config.learning.utc_offset_minutes, -300);
        assert_eq!(config.retention_days, 90);
        assert!(!config.injection.include_contextual);
        assert!(config.injection.enabled);
        assert_eq!(config.feedback_db_path, PathBuf::from("/tmp/fb.db"));
    }

    #[test]
    fn test_builder() {
        let config = NudgeConfig::builder()
            .quiet_hours("22:00", "07:00")
            .utc_offset_minutes(60)
            .retention_days(0)
            .reminder_db_path("/tmp/r.db")
            .build();

        assert_eq!(config.injection.quiet_hours_start.as_deref(), Some("22:00"));
        assert_eq!(config.learning.utc_offset_minutes, 60);
        assert_eq!(config.reminder_db_path, PathBuf::from("/tmp/r.db"));
        assert!(config.validate().is_err());
    }
}
