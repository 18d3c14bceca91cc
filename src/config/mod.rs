//! Configuration management.
//!
//! This module provides functions for locating the gallery-sync directory,
//! resolving the database path and audit actor, and loading engine settings.
//!
//! # Layout
//!
//! Everything lives under `~/.gallerysync/`:
//! - **Database**: `~/.gallerysync/data/gallery.db` (object graph + run-status store)
//! - **Settings**: `~/.gallerysync/config.json` (engine tuning, see [`SyncSettings`])

mod settings;

pub use settings::{load_settings, load_settings_from, save_settings_to, settings_path, SyncSettings};

use std::path::{Path, PathBuf};

/// Get the global gallery-sync directory location (`~/.gallerysync/`).
#[must_use]
pub fn global_gallerysync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".gallerysync"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `GSYNC_TEST_DB=1` (or any non-empty value).
/// This redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("GSYNC_TEST_DB")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && value.to_lowercase() != "false"
}

/// Get the test database path (`~/.gallerysync/test/gallery.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_gallerysync_dir().map(|dir| dir.join("test").join("gallery.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `GSYNC_TEST_DB` environment variable → uses test database
/// 3. `GSYNC_DB` environment variable
/// 4. Global location: `~/.gallerysync/data/gallery.db`
///
/// # Returns
///
/// Returns the path to the database file, or `None` if no location found.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Explicit path from CLI flag
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Test mode - use isolated test database
    if is_test_mode() {
        return test_db_path();
    }

    // Priority 3: GSYNC_DB environment variable
    if let Ok(db_path) = std::env::var("GSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    // Priority 4: Global database location
    global_gallerysync_dir().map(|dir| dir.join("data").join("gallery.db"))
}

/// Resolve the actor recorded in audit fields.
///
/// An explicit `--actor` wins; otherwise falls back to [`default_actor`].
#[must_use]
pub fn resolve_actor(explicit: Option<&str>) -> String {
    match explicit {
        Some(actor) if !actor.trim().is_empty() => actor.to_string(),
        _ => default_actor(),
    }
}

/// Get the default actor name.
///
/// Priority:
/// 1. `GSYNC_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("GSYNC_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}
