//! Error types for the gallery synchronization engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, 5=conflict, etc.)
//! - Retryability flags for scripted callers
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers
//!
//! Per-item media failures are not errors: they are
//! [`ProcessFailure`](crate::sync::ProcessFailure) values that the engine
//! turns into skip entries at the item boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    GalleryNotFound,
    AlbumNotFound,
    MediaNotFound,
    SyncNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Concurrency (exit 5)
    SynchronizationInProgress,

    // Sync (exit 6)
    SyncFailed,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::GalleryNotFound => "GALLERY_NOT_FOUND",
            Self::AlbumNotFound => "ALBUM_NOT_FOUND",
            Self::MediaNotFound => "MEDIA_NOT_FOUND",
            Self::SyncNotFound => "SYNC_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::SynchronizationInProgress => "SYNCHRONIZATION_IN_PROGRESS",
            Self::SyncFailed => "SYNC_FAILED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::GalleryNotFound
            | Self::AlbumNotFound
            | Self::MediaNotFound
            | Self::SyncNotFound => 3,
            Self::InvalidArgument => 4,
            Self::SynchronizationInProgress => 5,
            Self::SyncFailed => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// True for a busy gallery (the active run will finish eventually) and
    /// transient database errors. False for not-found, I/O, or internal errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SynchronizationInProgress | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in gallery synchronization operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `gsync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Gallery not found: {id}")]
    GalleryNotFound { id: String },

    #[error("Album not found: {id}")]
    AlbumNotFound { id: String },

    #[error("Media object not found: {id}")]
    MediaNotFound { id: String },

    #[error("Synchronization {synch_id} not found for gallery {gallery_id}")]
    SyncNotFound { gallery_id: String, synch_id: String },

    /// A second `Start` for a gallery that already has an active run.
    #[error("Synchronization already in progress for gallery {gallery_id} (run {synch_id})")]
    SynchronizationInProgress { gallery_id: String, synch_id: String },

    /// A run ended in the Error state; carries the captured cause.
    #[error("Synchronization failed: {0}")]
    SyncFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::GalleryNotFound { .. } => ErrorCode::GalleryNotFound,
            Self::AlbumNotFound { .. } => ErrorCode::AlbumNotFound,
            Self::MediaNotFound { .. } => ErrorCode::MediaNotFound,
            Self::SyncNotFound { .. } => ErrorCode::SyncNotFound,
            Self::SynchronizationInProgress { .. } => ErrorCode::SynchronizationInProgress,
            Self::SyncFailed(_) => ErrorCode::SyncFailed,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// The run no longer owns its gallery lock.
    #[must_use]
    pub fn lock_lost() -> Self {
        Self::SyncFailed("Gallery lock was lost to another run".to_string())
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `gsync init` to create the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::GalleryNotFound { id } => Some(format!(
                "No gallery with ID '{id}'. Use `gsync gallery list` to see available galleries."
            )),

            Self::AlbumNotFound { id } => Some(format!(
                "No album with ID '{id}'. Use `gsync album tree <gallery-id>` to browse albums."
            )),

            Self::MediaNotFound { id } => Some(format!(
                "No media object with ID '{id}'. Deleted orphans leave only their audit events."
            )),

            Self::SyncNotFound { gallery_id, .. } => Some(format!(
                "The run may have been purged after its retention window. \
                 Use `gsync sync list {gallery_id}` to see retained runs."
            )),

            Self::SynchronizationInProgress { gallery_id, synch_id } => Some(format!(
                "Wait for the active run to finish:\n  \
                 Status: gsync sync status {gallery_id} {synch_id}\n  \
                 Cancel: gsync sync abort {gallery_id} {synch_id}"
            )),

            Self::InvalidArgument(msg) => {
                if msg.contains("orphan") {
                    Some("Valid orphan policies: mark, delete".to_string())
                } else {
                    None
                }
            }

            Self::SyncFailed(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_is_conflict_category() {
        let err = Error::SynchronizationInProgress {
            gallery_id: "gal_1".into(),
            synch_id: "run_1".into(),
        };
        assert_eq!(err.error_code(), ErrorCode::SynchronizationInProgress);
        assert_eq!(err.exit_code(), 5);
        assert!(err.error_code().is_retryable());
        assert!(err.hint().unwrap().contains("gsync sync abort gal_1 run_1"));
    }

    #[test]
    fn test_structured_json_shape() {
        let err = Error::SyncNotFound {
            gallery_id: "gal_1".into(),
            synch_id: "missing".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "SYNC_NOT_FOUND");
        assert_eq!(json["error"]["exit_code"], 3);
        assert_eq!(json["error"]["retryable"], false);
        assert!(json["error"]["hint"].is_string());
    }

    #[test]
    fn test_database_error_maps_to_db_category() {
        let err = Error::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.exit_code(), 2);
        assert!(err.hint().is_none());
    }
}
