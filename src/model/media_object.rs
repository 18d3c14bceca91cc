//! Media object model.

use serde::{Deserialize, Serialize};

use super::gallery::MediaKind;

/// One rendition of a media object (original, optimized, or thumbnail).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Size in bytes
    pub size: u64,
}

/// A persisted media object: one source file plus its derived renditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaObjectRecord {
    /// Unique identifier (`mo_` prefix)
    pub id: String,

    pub gallery_id: String,

    /// Album the source file lives in
    pub album_id: String,

    pub kind: MediaKind,

    /// The source file; `original.filename` is the match key within the album
    pub original: Rendition,

    pub optimized: Option<Rendition>,

    pub thumbnail: Option<Rendition>,

    /// SHA-256 of the original content (hex)
    pub hash_key: String,

    /// Source file modification time (Unix milliseconds)
    pub file_mtime: i64,

    /// Display order within the album
    pub seq: i64,

    /// Set when the source file no longer exists on disk
    pub is_orphan: bool,

    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub modified_by: String,
}

impl MediaObjectRecord {
    /// Generate a fresh media object ID.
    #[must_use]
    pub fn new_id() -> String {
        format!("mo_{}", &uuid::Uuid::new_v4().simple().to_string()[..16])
    }

    /// Original filename (the record's match key).
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.original.filename
    }
}
