//! Synchronization run types.
//!
//! The run state machine, the caller's options, skip entries, per-run
//! statistics, and the progress snapshot that pollers read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NotStarted,
    Initializing,
    Walking,
    Reconciling,
    ProcessingFiles,
    Finalizing,
    Completed,
    Error,
    Cancelled,
}

impl SyncState {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Initializing => "initializing",
            Self::Walking => "walking",
            Self::Reconciling => "reconciling",
            Self::ProcessingFiles => "processing_files",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Error and Cancelled are final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Any non-terminal state may fail or be cancelled; otherwise states only
    /// advance one step at a time.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Error | Self::Cancelled => !matches!(self, Self::NotStarted),
            Self::Initializing => matches!(self, Self::NotStarted),
            Self::Walking => matches!(self, Self::Initializing),
            Self::Reconciling => matches!(self, Self::Walking),
            Self::ProcessingFiles => matches!(self, Self::Reconciling),
            Self::Finalizing => matches!(self, Self::ProcessingFiles),
            Self::Completed => matches!(self, Self::Finalizing),
            Self::NotStarted => false,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "initializing" => Ok(Self::Initializing),
            "walking" => Ok(Self::Walking),
            "reconciling" => Ok(Self::Reconciling),
            "processing_files" => Ok(Self::ProcessingFiles),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown sync state: {s}")),
        }
    }
}

/// Caller-supplied options for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Recurse into child directories.
    pub include_child_albums: bool,
    pub regenerate_thumbnails: bool,
    pub regenerate_optimized: bool,
    pub regenerate_metadata: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            include_child_albums: true,
            regenerate_thumbnails: false,
            regenerate_optimized: false,
            regenerate_metadata: false,
        }
    }
}

impl SyncOptions {
    /// True if unchanged files should still go back through the pipeline.
    #[must_use]
    pub const fn regenerates_anything(&self) -> bool {
        self.regenerate_thumbnails || self.regenerate_optimized || self.regenerate_metadata
    }
}

/// Why a file was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnsupportedType,
    CorruptFile,
    InsufficientStorage,
    IoError,
    NameCollision,
    DuplicateContent,
    WriteFailed,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedType => "unsupported_type",
            Self::CorruptFile => "corrupt_file",
            Self::InsufficientStorage => "insufficient_storage",
            Self::IoError => "io_error",
            Self::NameCollision => "name_collision",
            Self::DuplicateContent => "duplicate_content",
            Self::WriteFailed => "write_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file (or directory) that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    /// Path relative to the media root, `/`-separated.
    pub rel_path: String,
    pub file_name: String,
    pub reason: SkipReason,
    pub message: String,
}

impl SkipEntry {
    #[must_use]
    pub fn new(rel_path: &str, reason: SkipReason, message: impl Into<String>) -> Self {
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path).to_string();
        Self {
            rel_path: rel_path.to_string(),
            file_name,
            reason,
            message: message.into(),
        }
    }
}

/// Skip entries of one run, at most one per path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipList {
    entries: Vec<SkipEntry>,
}

impl SkipList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skip. A later entry for the same path replaces the earlier one.
    pub fn push(&mut self, entry: SkipEntry) {
        match self.entries.iter_mut().find(|e| e.rel_path == entry.rel_path) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub albums_created: usize,
    pub albums_restored: usize,
    pub albums_renamed: usize,
    pub albums_orphaned: usize,
    pub media_created: usize,
    pub media_updated: usize,
    pub media_relocated: usize,
    pub media_unchanged: usize,
    pub media_orphaned: usize,
    pub skipped: usize,
    pub batches_committed: usize,
    pub writes_committed: usize,
}

/// Snapshot of a run as seen by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub gallery_id: String,
    pub synch_id: String,
    pub album_id: String,
    pub state: SyncState,
    pub total_file_count: usize,
    pub current_file_index: usize,
    pub current_file_name: Option<String>,
    pub percent_complete: u8,
    pub skipped_files: Vec<SkipEntry>,
    pub stats: SyncStats,
    pub error_info: Option<String>,
    pub cancel_requested: bool,
    /// Unix milliseconds
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub updated_at: i64,
}

/// Percent complete for a progress position.
///
/// An empty run reports 100 once terminal and 0 before that.
#[must_use]
pub fn percent_complete(index: usize, total: usize, state: SyncState) -> u8 {
    if total == 0 {
        return if state.is_terminal() { 100 } else { 0 };
    }
    let pct = index.min(total) * 100 / total;
    u8::try_from(pct).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_and_terminal() {
        for state in [
            SyncState::NotStarted,
            SyncState::ProcessingFiles,
            SyncState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!(SyncState::Error.is_terminal());
        assert!(!SyncState::Finalizing.is_terminal());
        assert!("bogus".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_state_transitions() {
        assert!(SyncState::NotStarted.can_transition_to(SyncState::Initializing));
        assert!(!SyncState::NotStarted.can_transition_to(SyncState::Walking));
        assert!(SyncState::Walking.can_transition_to(SyncState::Error));
        assert!(SyncState::ProcessingFiles.can_transition_to(SyncState::Cancelled));
        assert!(!SyncState::Completed.can_transition_to(SyncState::Error));
        assert!(!SyncState::Cancelled.can_transition_to(SyncState::Finalizing));
    }

    #[test]
    fn test_skip_list_one_entry_per_path() {
        let mut skips = SkipList::new();
        skips.push(SkipEntry::new("a/b.jpg", SkipReason::NameCollision, "collides"));
        skips.push(SkipEntry::new("a/c.exe", SkipReason::UnsupportedType, "exe"));
        skips.push(SkipEntry::new("a/b.jpg", SkipReason::CorruptFile, "bad header"));

        assert_eq!(skips.len(), 2);
        assert_eq!(skips.entries()[0].reason, SkipReason::CorruptFile);
        assert_eq!(skips.entries()[0].file_name, "b.jpg");
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 0, SyncState::ProcessingFiles), 0);
        assert_eq!(percent_complete(0, 0, SyncState::Completed), 100);
        assert_eq!(percent_complete(1, 3, SyncState::ProcessingFiles), 33);
        assert_eq!(percent_complete(5, 5, SyncState::Completed), 100);
    }

    #[test]
    fn test_skip_reason_serializes_snake_case() {
        let entry = SkipEntry::new("x.exe", SkipReason::UnsupportedType, "no");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["reason"], "unsupported_type");
    }
}
