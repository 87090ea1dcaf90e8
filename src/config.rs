//! Configuration for the snooze daemon and CLI.

use crate::error::{Result, SnoozeError};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeConfig {
    /// Durable store settings.
    pub store: StoreConfig,
    /// Timer and reconciliation settings.
    pub scheduler: SchedulerConfig,
    /// How snoozed URLs get reopened.
    pub opener: OpenerConfig,
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON store file (None = `paths::store_file()`).
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved store file path.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(crate::paths::store_file)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the overdue-check safety net, in minutes.
    ///
    /// Catches occurrences whose dedicated timer never fired (e.g. after the
    /// host slept for a long time). Values below 1 are treated as 1.
    pub overdue_check_minutes: u32,
    /// IANA time zone used for wall-clock recurrence rules (e.g. `Europe/Berlin`).
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            overdue_check_minutes: 1,
            timezone: default_timezone(),
        }
    }
}

impl SchedulerConfig {
    /// Parse [`Self::timezone`].
    ///
    /// # Errors
    ///
    /// Returns [`SnoozeError::Config`] for an unknown zone name.
    pub fn time_zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| SnoozeError::Config(format!("unknown timezone '{}': {e}", self.timezone)))
    }

    /// Overdue-check period clamped to at least one minute.
    #[must_use]
    pub fn overdue_period_minutes(&self) -> u32 {
        self.overdue_check_minutes.max(1)
    }
}

/// Zone from `TZ` when it names a known IANA zone, else UTC.
fn default_timezone() -> String {
    std::env::var("TZ")
        .ok()
        .map(|tz| tz.trim_start_matches(':').to_owned())
        .filter(|tz| tz.parse::<Tz>().is_ok())
        .unwrap_or_else(|| "UTC".to_owned())
}

/// URL opener configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenerConfig {
    /// Program invoked with the URL as its only argument.
    ///
    /// None = platform default (`open`, `xdg-open`, or `cmd /C start`).
    pub command: Option<String>,
}

impl SnoozeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SnoozeError::Config(e.to_string()))
    }

    /// Load from `path` if given, else from the default path when it exists,
    /// else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SnoozeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }
}
