//! Album model.
//!
//! An album mirrors one directory below the gallery's media root. The root
//! album has no parent and an empty directory name.

use serde::{Deserialize, Serialize};

/// One node of the album tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumNode {
    /// Unique identifier (`alb_` prefix)
    pub id: String,

    /// Gallery this album belongs to
    pub gallery_id: String,

    /// Parent album; `None` only for the gallery's root album
    pub parent_id: Option<String>,

    /// Directory name on disk (unique among siblings)
    pub directory_name: String,

    /// Path relative to the media root, `/`-separated, empty for the root
    pub rel_path: String,

    /// Display order among siblings
    pub seq: i64,

    /// Media object used as the album cover
    pub thumbnail_media_id: Option<String>,

    /// Set when the directory no longer exists on disk
    pub is_orphan: bool,

    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub modified_by: String,
}

impl AlbumNode {
    /// Create the root album of a gallery.
    #[must_use]
    pub fn root(gallery_id: &str, actor: &str) -> Self {
        Self::new(gallery_id, None, "", "", 0, actor)
    }

    /// Create a child album node (not yet persisted).
    #[must_use]
    pub fn new(
        gallery_id: &str,
        parent_id: Option<&str>,
        directory_name: &str,
        rel_path: &str,
        seq: i64,
        actor: &str,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("alb_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            gallery_id: gallery_id.to_string(),
            parent_id: parent_id.map(String::from),
            directory_name: directory_name.to_string(),
            rel_path: rel_path.to_string(),
            seq,
            thumbnail_media_id: None,
            is_orphan: false,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            modified_by: actor.to_string(),
        }
    }

    /// Whether this is the gallery's root album.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of path components below the media root.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.rel_path.is_empty() {
            0
        } else {
            self.rel_path.split('/').count()
        }
    }
}
