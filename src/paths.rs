//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (store, logs) | `~/Library/Application Support/snoozer/` | `~/.local/share/snoozer/` |
//! | Config | `~/Library/Application Support/snoozer/` | `~/.config/snoozer/` |
//!
//! `SNOOZER_DATA_DIR` and `SNOOZER_CONFIG_DIR` override the defaults.

use std::path::PathBuf;

/// Application data root directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SNOOZER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("snoozer"))
        .unwrap_or_else(|| PathBuf::from("/tmp/snoozer-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SNOOZER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("snoozer"))
        .unwrap_or_else(|| PathBuf::from("/tmp/snoozer-config"))
}

/// Default JSON store file (`data_dir()/snoozes.json`).
#[must_use]
pub fn store_file() -> PathBuf {
    data_dir().join("snoozes.json")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
