//! TOML-based application configuration.
//!
//! Stores:
//! - Reminder timing (pre-notice, escalation, snooze, dedup, retry, settle)
//! - Wake-hold bounds per trigger kind
//! - Alert preferences (silent mode, vibration, custom sound)
//! - Desktop timer host behaviour
//!
//! Configuration is stored at `~/.config/medtrack/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::reminder::PrecisionMode;

/// Reminder timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemindersConfig {
    /// How long before the main alarm the pre-notice fires.
    #[serde(default = "default_5")]
    pub pre_notice_offset_mins: u32,
    /// Minimum time left before the main alarm for a pre-notice to be worth it.
    #[serde(default = "default_pre_notice_lead")]
    pub pre_notice_lead_mins: u32,
    #[serde(default = "default_5")]
    pub escalation_interval_mins: u32,
    #[serde(default = "default_5")]
    pub default_snooze_mins: u32,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Wait after a restart before rebuilding triggers.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

/// Upper bounds on wake holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeConfig {
    /// Main, escalation and snooze deliveries.
    #[serde(default = "default_alarm_hold")]
    pub alarm_hold_secs: u64,
    #[serde(default = "default_pre_notice_hold")]
    pub pre_notice_hold_secs: u64,
}

/// Alert preferences handed to the alert sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// No sound at all when set.
    #[serde(default)]
    pub silent_mode: bool,
    #[serde(default = "default_true")]
    pub vibration: bool,
    /// Path or URI of a custom alarm sound (optional).
    /// If unset the host default sound is used.
    #[serde(default)]
    pub custom_sound: Option<String>,
    /// Ringing stops after this long without a response.
    #[serde(default = "default_ring")]
    pub ring_secs: u64,
}

/// Behaviour of the desktop timer host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Whether precise timers are permitted.
    #[serde(default = "default_true")]
    pub precise_permitted: bool,
    /// Modes the host reports as unavailable.
    #[serde(default)]
    pub unavailable_modes: Vec<PrecisionMode>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/medtrack/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub host: HostConfig,
}

// Default functions
fn default_5() -> u32 {
    5
}
fn default_pre_notice_lead() -> u32 {
    6
}
fn default_dedup_window() -> u64 {
    30
}
fn default_retry_delay() -> u64 {
    2
}
fn default_settle_delay() -> u64 {
    5
}
fn default_alarm_hold() -> u64 {
    600
}
fn default_pre_notice_hold() -> u64 {
    180
}
fn default_ring() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            pre_notice_offset_mins: default_5(),
            pre_notice_lead_mins: default_pre_notice_lead(),
            escalation_interval_mins: default_5(),
            default_snooze_mins: default_5(),
            dedup_window_secs: default_dedup_window(),
            retry_delay_secs: default_retry_delay(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl RemindersConfig {
    /// Reject timings that would stall reminders.
    ///
    /// An escalation firing inside the dedup window of the previous one is
    /// dropped as a duplicate and arms nothing, so the interval must be
    /// longer than the window. The pre-notice has to fire inside the lead
    /// it is guarded by.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| ConfigError::InvalidValue {
            key: format!("reminders.{key}"),
            message,
        };
        if self.escalation_interval_mins == 0 {
            return Err(invalid("escalation_interval_mins", "must be at least 1 minute".into()));
        }
        if u64::from(self.escalation_interval_mins) * 60 <= self.dedup_window_secs {
            return Err(invalid(
                "dedup_window_secs",
                format!(
                    "{}s is not shorter than the escalation interval of {} min",
                    self.dedup_window_secs, self.escalation_interval_mins
                ),
            ));
        }
        if self.pre_notice_offset_mins >= self.pre_notice_lead_mins {
            return Err(invalid(
                "pre_notice_offset_mins",
                format!(
                    "must be less than pre_notice_lead_mins ({})",
                    self.pre_notice_lead_mins
                ),
            ));
        }
        if !(1..=24 * 60).contains(&self.default_snooze_mins) {
            return Err(invalid(
                "default_snooze_mins",
                "must be between 1 and 1440".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            alarm_hold_secs: default_alarm_hold(),
            pre_notice_hold_secs: default_pre_notice_hold(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            silent_mode: false,
            vibration: true,
            custom_sound: None,
            ring_secs: default_ring(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            precise_permitted: true,
            unavailable_modes: Vec::new(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        key.split('.').try_fold(root, |current, part| current.get(part))
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        if let Some(parent_path) = parent_path {
            for part in parent_path.split('.') {
                current = current
                    .get_mut(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            }
        }
        let obj = current
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let existing = obj
            .get(leaf)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
            ),
            serde_json::Value::Number(_) => value
                .parse::<u64>()
                .map(|n| serde_json::Value::Number(n.into()))
                .map_err(|_| invalid(format!("cannot parse '{value}' as a whole number")))?,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
            }
            serde_json::Value::Null if value.is_empty() || value == "none" => serde_json::Value::Null,
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    /// `config.toml` in the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults if no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Self = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.reminders.validate().map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. Does not save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.reminders.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let parsed: Config = toml::from_str("[alerts]\nsilent_mode = true\n").unwrap();
        assert!(parsed.alerts.silent_mode);
        assert_eq!(parsed.alerts.ring_secs, 60);
        assert_eq!(parsed.reminders.dedup_window_secs, 30);
        assert_eq!(parsed.wake.alarm_hold_secs, 600);
        assert_eq!(parsed.wake.pre_notice_hold_secs, 180);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("alerts.vibration").as_deref(), Some("true"));
        assert_eq!(cfg.get("reminders.pre_notice_lead_mins").as_deref(), Some("6"));
        assert!(cfg.get("alerts.missing_key").is_none());
        assert!(cfg.get("").is_none());
    }

    #[test]
    fn set_updates_bool_number_and_optional_string() {
        let mut cfg = Config::default();
        cfg.set("alerts.silent_mode", "true").unwrap();
        cfg.set("reminders.default_snooze_mins", "10").unwrap();
        cfg.set("alerts.custom_sound", "/usr/share/sounds/bell.ogg").unwrap();
        assert!(cfg.alerts.silent_mode);
        assert_eq!(cfg.reminders.default_snooze_mins, 10);
        assert_eq!(cfg.alerts.custom_sound.as_deref(), Some("/usr/share/sounds/bell.ogg"));
    }

    #[test]
    fn set_accepts_mode_lists_as_json() {
        let mut cfg = Config::default();
        cfg.set("host.unavailable_modes", r#"["exact_allow_while_idle"]"#).unwrap();
        assert_eq!(cfg.host.unavailable_modes, vec![PrecisionMode::ExactAllowWhileIdle]);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("alerts.nonexistent_key", "value"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(cfg.set("nowhere.at_all", "1").is_err());
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(cfg.set("alerts.vibration", "not_a_bool").is_err());
        assert!(cfg.set("wake.alarm_hold_secs", "-5").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn set_refuses_timings_that_stall_escalation() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("reminders.dedup_window_secs", "600"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("reminders.dedup_window_secs", "300").is_err());
        assert!(cfg.set("reminders.escalation_interval_mins", "0").is_err());
        assert_eq!(cfg, Config::default());

        cfg.set("reminders.dedup_window_secs", "299").unwrap();
        cfg.set("reminders.escalation_interval_mins", "10").unwrap();
        cfg.set("reminders.dedup_window_secs", "599").unwrap();
        assert_eq!(cfg.reminders.dedup_window_secs, 599);
    }

    #[test]
    fn set_refuses_pre_notice_outside_its_lead() {
        let mut cfg = Config::default();
        assert!(cfg.set("reminders.pre_notice_offset_mins", "6").is_err());
        assert!(cfg.set("reminders.pre_notice_lead_mins", "5").is_err());
        assert!(cfg.set("reminders.default_snooze_mins", "0").is_err());
        assert_eq!(cfg, Config::default());

        cfg.set("reminders.pre_notice_lead_mins", "15").unwrap();
        cfg.set("reminders.pre_notice_offset_mins", "10").unwrap();
        assert_eq!(cfg.reminders.pre_notice_offset_mins, 10);
    }

    #[test]
    fn load_from_refuses_stalling_timings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reminders]\ndedup_window_secs = 600\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::LoadFailed { .. })));
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reminders]\ndedup_window_secs = \"soon\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::LoadFailed { .. })));
    }
}
