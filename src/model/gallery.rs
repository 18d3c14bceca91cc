//! Gallery model.
//!
//! A gallery is the top-level collection: one media root directory on disk,
//! one root album, and the settings the synchronization engine reads when it
//! reconciles that directory tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happens to records whose file or directory disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Keep the record, flag it as orphaned.
    #[default]
    Mark,
    /// Remove the record from the graph.
    Delete,
}

impl OrphanPolicy {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mark => "mark",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mark" => Ok(Self::Mark),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Unknown orphan policy: {s}")),
        }
    }
}

/// Broad media category, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    /// Unknown extension accepted because the gallery allows unknown types.
    Generic,
}

impl MediaKind {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Generic => "generic",
        }
    }

    /// Parse from string, falling back to `Generic`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" => Self::Document,
            _ => Self::Generic,
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "avif",
    "nef", "cr2", "cr3", "arw", "dng", "orf", "raf", "rw2",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "avi", "wmv", "mkv", "webm", "mpg", "mpeg", "3gp", "flv",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "flac", "ogg", "oga", "wma"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];

/// Per-gallery synchronization settings.
///
/// Stored as JSON alongside the gallery record. Missing fields take their
/// defaults so older rows keep deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GallerySettings {
    /// Fall back to content-hash matching for files whose name matches nothing.
    pub detect_renamed: bool,

    /// Accept files with unknown extensions as generic binaries.
    pub allow_unknown_types: bool,

    /// What to do with records that no longer have a filesystem entry.
    pub orphan_policy: OrphanPolicy,

    /// Ignore dot-files and prune dot-directories during the walk.
    pub skip_hidden: bool,

    /// Supported extensions (lowercase, no dot) and the kind each maps to.
    pub extensions: BTreeMap<String, MediaKind>,
}

impl Default for GallerySettings {
    fn default() -> Self {
        let mut extensions = BTreeMap::new();
        for (list, kind) in [
            (IMAGE_EXTENSIONS, MediaKind::Image),
            (VIDEO_EXTENSIONS, MediaKind::Video),
            (AUDIO_EXTENSIONS, MediaKind::Audio),
            (DOCUMENT_EXTENSIONS, MediaKind::Document),
        ] {
            for ext in list {
                extensions.insert((*ext).to_string(), kind);
            }
        }

        Self {
            detect_renamed: true,
            allow_unknown_types: false,
            orphan_policy: OrphanPolicy::Mark,
            skip_hidden: true,
            extensions,
        }
    }
}

impl GallerySettings {
    /// Classify a file name by its extension.
    ///
    /// Returns `None` when the extension is unsupported and unknown types
    /// are not allowed.
    #[must_use]
    pub fn classify(&self, file_name: &str) -> Option<MediaKind> {
        let ext = std::path::Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        match ext.and_then(|e| self.extensions.get(&e).copied()) {
            Some(kind) => Some(kind),
            None if self.allow_unknown_types => Some(MediaKind::Generic),
            None => None,
        }
    }
}

/// A gallery: media root plus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    /// Unique identifier (`gal_` prefix)
    pub id: String,

    /// Display name
    pub name: String,

    /// Absolute path of the directory the root album mirrors
    pub media_root: String,

    /// Synchronization settings
    pub settings: GallerySettings,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Gallery {
    /// Create a new gallery with default settings.
    #[must_use]
    pub fn new(name: String, media_root: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let id = format!("gal_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        Self {
            id,
            name,
            media_root,
            settings: GallerySettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
