//! Engine settings file.
//!
//! Loads and saves tuning knobs from `~/.gallerysync/config.json`. A missing
//! file means defaults; a present file may omit any field.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tuning for synchronization runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Graph writes per committed transaction.
    pub batch_size: usize,

    /// Gallery lock expiry; renewed on every progress update.
    pub lock_ttl_secs: u64,

    /// How long terminal runs stay queryable before being purged.
    pub status_retention_secs: u64,

    /// Interval between status polls while waiting on a run.
    pub poll_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            lock_ttl_secs: 300,
            status_retention_secs: 3600,
            poll_interval_ms: 500,
        }
    }
}

impl SyncSettings {
    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.lock_ttl_secs == 0 {
            return Err(Error::Config("lock_ttl_secs must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    #[must_use]
    pub fn status_retention(&self) -> Duration {
        Duration::from_secs(self.status_retention_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Get the settings file path.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn settings_path() -> Result<PathBuf> {
    super::global_gallerysync_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or(Error::Config("Could not determine home directory".into()))
}

/// Load settings from the global config file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or validated.
pub fn load_settings() -> Result<SyncSettings> {
    load_settings_from(&settings_path()?)
}

/// Load settings from a specific file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or validated.
pub fn load_settings_from(path: &Path) -> Result<SyncSettings> {
    if !path.exists() {
        return Ok(SyncSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let settings: SyncSettings = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))?;

    settings.validate()?;
    Ok(settings)
}

/// Save settings to a specific file, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_settings_to(path: &Path, settings: &SyncSettings) -> Result<()> {
    settings.validate()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))?;

    Ok(())
}
