//! Command implementations.

pub mod album;
pub mod completions;
pub mod gallery;
pub mod init;
pub mod media;
pub mod sync;
pub mod version;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use std::path::PathBuf;

/// Resolve the database path, requiring an initialized database.
pub(crate) fn require_db_path(db_path: Option<&PathBuf>) -> Result<PathBuf> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    Ok(db_path)
}

/// Open the database at an initialized location.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    SqliteStorage::open(&require_db_path(db_path)?)
}

/// Format a millisecond timestamp as RFC 3339.
pub(crate) fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map_or_else(|| ts.to_string(), |dt| dt.to_rfc3339())
}
