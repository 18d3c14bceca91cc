//! SQLite storage implementation.
//!
//! This module provides the persistence layer for the gallery object graph.
//! It follows the MutationContext pattern for transaction discipline and audit
//! logging: every write runs inside one IMMEDIATE transaction together with
//! its audit events, and rolls back as a unit on error.

use crate::error::{Error, Result};
use crate::model::{AlbumNode, Gallery, GallerySettings, MediaKind, MediaObjectRecord, Rendition};
use crate::storage::events::{insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend for the object graph.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, tracking side effects.
///
/// This struct is passed to mutation closures to record audit events that
/// are written at the end of the transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Gallery lock ownership a sync batch must still hold when it commits.
///
/// The check and the expiry push happen inside the batch transaction, so a
/// run that lost its lock to a takeover can never land another batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub gallery_id: String,
    pub owner: String,
    pub ttl: Duration,
}

impl LockLease {
    #[must_use]
    pub fn new(gallery_id: &str, owner: &str, ttl: Duration) -> Self {
        Self {
            gallery_id: gallery_id.to_string(),
            owner: owner.to_string(),
            ttl,
        }
    }

    fn expires_at(&self, now: i64) -> i64 {
        now.saturating_add(i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

/// One mutation of the object graph, applied inside a batch transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphWrite {
    InsertAlbum(AlbumNode),
    RestoreAlbum { album_id: String },
    /// The directory was renamed on disk (case only); descendants follow.
    RenameAlbum {
        album_id: String,
        directory_name: String,
        rel_path: String,
    },
    OrphanAlbum { album_id: String },
    DeleteAlbum { album_id: String },
    SetAlbumThumbnail { album_id: String, media_id: String },
    InsertMedia(MediaObjectRecord),
    UpdateMedia(MediaObjectRecord),
    /// Full-row update that also moved or renamed the source file.
    RelocateMedia { record: MediaObjectRecord, from: String },
    OrphanMedia { media_id: String },
    DeleteMedia { media_id: String },
}

impl GraphWrite {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InsertAlbum(_) => "insert_album",
            Self::RestoreAlbum { .. } => "restore_album",
            Self::RenameAlbum { .. } => "rename_album",
            Self::OrphanAlbum { .. } => "orphan_album",
            Self::DeleteAlbum { .. } => "delete_album",
            Self::SetAlbumThumbnail { .. } => "set_album_thumbnail",
            Self::InsertMedia(_) => "insert_media",
            Self::UpdateMedia(_) => "update_media",
            Self::RelocateMedia { .. } => "relocate_media",
            Self::OrphanMedia { .. } => "orphan_media",
            Self::DeleteMedia { .. } => "delete_media",
        }
    }
}

/// The persisted state of one album subtree, read before reconciling.
#[derive(Debug, Clone, Default)]
pub struct GallerySnapshot {
    /// Albums in the subtree, including the start album, ordered by path.
    pub albums: Vec<AlbumNode>,
    /// Media objects whose album is in the subtree.
    pub media: Vec<MediaObjectRecord>,
}

const ALBUM_COLUMNS: &str = "id, gallery_id, parent_id, directory_name, rel_path, seq, \
     thumbnail_media_id, is_orphan, created_at, created_by, updated_at, modified_by";

const MEDIA_COLUMNS: &str = "id, gallery_id, album_id, kind, \
     original_filename, original_width, original_height, original_size, \
     optimized_filename, optimized_width, optimized_height, optimized_size, \
     thumbnail_filename, thumbnail_width, thumbnail_height, thumbnail_size, \
     hash_key, file_mtime, seq, is_orphan, created_at, created_by, updated_at, modified_by";

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<AlbumNode> {
    Ok(AlbumNode {
        id: row.get(0)?,
        gallery_id: row.get(1)?,
        parent_id: row.get(2)?,
        directory_name: row.get(3)?,
        rel_path: row.get(4)?,
        seq: row.get(5)?,
        thumbnail_media_id: row.get(6)?,
        is_orphan: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        created_by: row.get(9)?,
        updated_at: row.get(10)?,
        modified_by: row.get(11)?,
    })
}

fn rendition_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<Rendition>> {
    let filename: Option<String> = row.get(first)?;
    Ok(match filename {
        Some(filename) => Some(Rendition {
            filename,
            width: row.get(first + 1)?,
            height: row.get(first + 2)?,
            size: row.get::<_, Option<i64>>(first + 3)?.unwrap_or(0).max(0) as u64,
        }),
        None => None,
    })
}

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<MediaObjectRecord> {
    Ok(MediaObjectRecord {
        id: row.get(0)?,
        gallery_id: row.get(1)?,
        album_id: row.get(2)?,
        kind: MediaKind::parse(&row.get::<_, String>(3)?),
        original: Rendition {
            filename: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
            size: row.get::<_, i64>(7)?.max(0) as u64,
        },
        optimized: rendition_from_row(row, 8)?,
        thumbnail: rendition_from_row(row, 12)?,
        hash_key: row.get(16)?,
        file_mtime: row.get(17)?,
        seq: row.get(18)?,
        is_orphan: row.get::<_, i64>(19)? != 0,
        created_at: row.get(20)?,
        created_by: row.get(21)?,
        updated_at: row.get(22)?,
        modified_by: row.get(23)?,
    })
}

fn gallery_from_row(row: &Row<'_>) -> rusqlite::Result<(Gallery, String)> {
    let settings_json: String = row.get(3)?;
    Ok((
        Gallery {
            id: row.get(0)?,
            name: row.get(1)?,
            media_root: row.get(2)?,
            settings: GallerySettings::default(),
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        },
        settings_json,
    ))
}

fn with_settings((mut gallery, settings_json): (Gallery, String)) -> Result<Gallery> {
    gallery.settings = serde_json::from_str(&settings_json)?;
    Ok(gallery)
}

#[allow(clippy::cast_possible_wrap)]
fn size_param(size: u64) -> i64 {
    size as i64
}

fn insert_album(tx: &Transaction, album: &AlbumNode) -> rusqlite::Result<()> {
    tx.execute(
        &format!("INSERT INTO albums ({ALBUM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        rusqlite::params![
            album.id,
            album.gallery_id,
            album.parent_id,
            album.directory_name,
            album.rel_path,
            album.seq,
            album.thumbnail_media_id,
            i64::from(album.is_orphan),
            album.created_at,
            album.created_by,
            album.updated_at,
            album.modified_by,
        ],
    )?;
    Ok(())
}

fn rendition_params(r: Option<&Rendition>) -> (Option<&str>, Option<u32>, Option<u32>, Option<i64>) {
    match r {
        Some(r) => (Some(r.filename.as_str()), r.width, r.height, Some(size_param(r.size))),
        None => (None, None, None, None),
    }
}

fn insert_media(tx: &Transaction, m: &MediaObjectRecord) -> rusqlite::Result<()> {
    let opt = rendition_params(m.optimized.as_ref());
    let thumb = rendition_params(m.thumbnail.as_ref());
    tx.execute(
        &format!(
            "INSERT INTO media_objects ({MEDIA_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)"
        ),
        rusqlite::params![
            m.id,
            m.gallery_id,
            m.album_id,
            m.kind.as_str(),
            m.original.filename,
            m.original.width,
            m.original.height,
            size_param(m.original.size),
            opt.0,
            opt.1,
            opt.2,
            opt.3,
            thumb.0,
            thumb.1,
            thumb.2,
            thumb.3,
            m.hash_key,
            m.file_mtime,
            m.seq,
            i64::from(m.is_orphan),
            m.created_at,
            m.created_by,
            m.updated_at,
            m.modified_by,
        ],
    )?;
    Ok(())
}

fn update_media(tx: &Transaction, m: &MediaObjectRecord) -> Result<()> {
    let opt = rendition_params(m.optimized.as_ref());
    let thumb = rendition_params(m.thumbnail.as_ref());
    let changed = tx.execute(
        "UPDATE media_objects SET album_id = ?2, kind = ?3,
             original_filename = ?4, original_width = ?5, original_height = ?6, original_size = ?7,
             optimized_filename = ?8, optimized_width = ?9, optimized_height = ?10, optimized_size = ?11,
             thumbnail_filename = ?12, thumbnail_width = ?13, thumbnail_height = ?14, thumbnail_size = ?15,
             hash_key = ?16, file_mtime = ?17, seq = ?18, is_orphan = ?19,
             updated_at = ?20, modified_by = ?21
         WHERE id = ?1",
        rusqlite::params![
            m.id,
            m.album_id,
            m.kind.as_str(),
            m.original.filename,
            m.original.width,
            m.original.height,
            size_param(m.original.size),
            opt.0,
            opt.1,
            opt.2,
            opt.3,
            thumb.0,
            thumb.1,
            thumb.2,
            thumb.3,
            m.hash_key,
            m.file_mtime,
            m.seq,
            i64::from(m.is_orphan),
            m.updated_at,
            m.modified_by,
        ],
    )?;

    if changed == 0 {
        return Err(Error::Other(format!("Media object vanished during update: {}", m.id)));
    }
    Ok(())
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        // Execute the mutation; dropping `tx` on error rolls back
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ==================
    // Gallery Operations
    // ==================

    /// Create a gallery together with its root album.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_gallery(&mut self, gallery: &Gallery, actor: &str) -> Result<AlbumNode> {
        let settings = serde_json::to_string(&gallery.settings)?;
        let root = AlbumNode::root(&gallery.id, actor);

        self.mutate("create_gallery", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO galleries (id, name, media_root, settings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    gallery.id,
                    gallery.name,
                    gallery.media_root,
                    settings,
                    gallery.created_at,
                    gallery.updated_at
                ],
            )?;
            insert_album(tx, &root)?;

            ctx.record_event("gallery", &gallery.id, EventType::GalleryCreated);
            ctx.record_event("album", &root.id, EventType::AlbumCreated);
            Ok(())
        })?;

        Ok(root)
    }

    /// Get a gallery by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored settings are invalid.
    pub fn get_gallery(&self, id: &str) -> Result<Option<Gallery>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, media_root, settings, created_at, updated_at
                 FROM galleries WHERE id = ?1",
                [id],
                gallery_from_row,
            )
            .optional()?;

        row.map(with_settings).transpose()
    }

    /// Get a gallery by ID or fail with `GalleryNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `GalleryNotFound` if no gallery has this ID.
    pub fn require_gallery(&self, id: &str) -> Result<Gallery> {
        self.get_gallery(id)?
            .ok_or_else(|| Error::GalleryNotFound { id: id.to_string() })
    }

    /// List all galleries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_galleries(&self) -> Result<Vec<Gallery>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, media_root, settings, created_at, updated_at
             FROM galleries ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], gallery_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(with_settings).collect()
    }

    /// Replace a gallery's synchronization settings.
    ///
    /// # Errors
    ///
    /// Returns `GalleryNotFound` if no gallery has this ID.
    pub fn update_gallery_settings(
        &mut self,
        id: &str,
        settings: &GallerySettings,
        actor: &str,
    ) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("update_gallery_settings", actor, |tx, ctx| {
            let changed = tx.execute(
                "UPDATE galleries SET settings = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, json, now],
            )?;
            if changed == 0 {
                return Err(Error::GalleryNotFound { id: id.to_string() });
            }
            ctx.record_change("gallery", id, EventType::GalleryUpdated, None, Some(json.clone()));
            Ok(())
        })
    }

    // ==================
    // Album Operations
    // ==================

    /// Get an album by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_album(&self, id: &str) -> Result<Option<AlbumNode>> {
        let album = self
            .conn
            .query_row(
                &format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ?1"),
                [id],
                album_from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// Get the root album of a gallery.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_root_album(&self, gallery_id: &str) -> Result<Option<AlbumNode>> {
        let album = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ALBUM_COLUMNS} FROM albums WHERE gallery_id = ?1 AND parent_id IS NULL"
                ),
                [gallery_id],
                album_from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// List every album of a gallery, ordered by path (parents before children).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_albums(&self, gallery_id: &str) -> Result<Vec<AlbumNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALBUM_COLUMNS} FROM albums WHERE gallery_id = ?1 ORDER BY rel_path, seq"
        ))?;
        let rows = stmt.query_map([gallery_id], album_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count non-orphaned media objects per album for a gallery.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_media_by_album(&self, gallery_id: &str) -> Result<HashMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT album_id, COUNT(*) FROM media_objects
             WHERE gallery_id = ?1 AND is_orphan = 0
             GROUP BY album_id",
        )?;
        let rows = stmt.query_map([gallery_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (album_id, count) = row?;
            counts.insert(album_id, usize::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    // ==================
    // Media Operations
    // ==================

    /// Get a media object by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_media_object(&self, id: &str) -> Result<Option<MediaObjectRecord>> {
        let media = self
            .conn
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media_objects WHERE id = ?1"),
                [id],
                media_from_row,
            )
            .optional()?;
        Ok(media)
    }

    /// List the media objects of one album, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_media_objects(&self, album_id: &str) -> Result<Vec<MediaObjectRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_objects WHERE album_id = ?1 ORDER BY seq, original_filename"
        ))?;
        let rows = stmt.query_map([album_id], media_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ==================
    // Synchronization Support
    // ==================

    /// Read the persisted state of an album subtree.
    ///
    /// With `include_children` false, only the start album and its own media
    /// are returned.
    ///
    /// # Errors
    ///
    /// Returns `AlbumNotFound` if the start album does not exist.
    pub fn load_subtree(&self, album_id: &str, include_children: bool) -> Result<GallerySnapshot> {
        let start = self
            .get_album(album_id)?
            .ok_or_else(|| Error::AlbumNotFound { id: album_id.to_string() })?;

        let albums = if !include_children {
            vec![start]
        } else if start.rel_path.is_empty() {
            self.list_albums(&start.gallery_id)?
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {ALBUM_COLUMNS} FROM albums
                 WHERE gallery_id = ?1
                   AND (rel_path = ?2 OR substr(rel_path, 1, length(?2) + 1) = ?2 || '/')
                 ORDER BY rel_path, seq"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![start.gallery_id, start.rel_path],
                album_from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let ids: HashSet<&str> = albums.iter().map(|a| a.id.as_str()).collect();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_objects WHERE gallery_id = ?1 ORDER BY album_id, seq"
        ))?;
        let gallery_id = albums.first().map(|a| a.gallery_id.clone()).unwrap_or_default();
        let media = stmt
            .query_map([gallery_id], media_from_row)?
            .filter(|m| m.as_ref().map_or(true, |m| ids.contains(m.album_id.as_str())))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(GallerySnapshot { albums, media })
    }

    /// Apply a batch of graph writes atomically.
    ///
    /// Either every write lands or none does.
    ///
    /// # Errors
    ///
    /// Returns the first failing write's error; the transaction is rolled back.
    pub fn apply_writes(&mut self, writes: &[GraphWrite], actor: &str) -> Result<()> {
        self.apply_writes_with_lease(writes, actor, None)
    }

    /// Apply a batch of graph writes atomically, provided `lease` still owns
    /// the gallery lock. The lease is renewed in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `SyncFailed` if the lock changed hands, or the first failing
    /// write's error. Either way nothing from the batch persists.
    pub fn apply_writes_with_lease(
        &mut self,
        writes: &[GraphWrite],
        actor: &str,
        lease: Option<&LockLease>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("sync_batch", actor, |tx, ctx| {
            if let Some(lease) = lease {
                let held = tx.execute(
                    "UPDATE gallery_locks SET expires_at = ?3 WHERE gallery_id = ?1 AND owner_token = ?2",
                    rusqlite::params![lease.gallery_id, lease.owner, lease.expires_at(now)],
                )?;
                if held == 0 {
                    return Err(Error::lock_lost());
                }
            }

            for write in writes {
                match write {
                    GraphWrite::InsertAlbum(album) => {
                        insert_album(tx, album)?;
                        ctx.record_change(
                            "album",
                            &album.id,
                            EventType::AlbumCreated,
                            None,
                            Some(album.rel_path.clone()),
                        );
                    }
                    GraphWrite::RestoreAlbum { album_id } => {
                        tx.execute(
                            "UPDATE albums SET is_orphan = 0, updated_at = ?2, modified_by = ?3 WHERE id = ?1",
                            rusqlite::params![album_id, now, actor],
                        )?;
                        ctx.record_event("album", album_id, EventType::AlbumRestored);
                    }
                    GraphWrite::RenameAlbum {
                        album_id,
                        directory_name,
                        rel_path,
                    } => {
                        let (gallery_id, old_path): (String, String) = tx.query_row(
                            "SELECT gallery_id, rel_path FROM albums WHERE id = ?1",
                            [album_id],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )?;
                        tx.execute(
                            "UPDATE albums SET directory_name = ?2, rel_path = ?3, updated_at = ?4, modified_by = ?5
                             WHERE id = ?1",
                            rusqlite::params![album_id, directory_name, rel_path, now, actor],
                        )?;
                        let moved = tx.execute(
                            "UPDATE albums SET rel_path = ?3 || substr(rel_path, length(?2) + 1),
                                 updated_at = ?4, modified_by = ?5
                             WHERE gallery_id = ?1 AND substr(rel_path, 1, length(?2) + 1) = ?2 || '/'",
                            rusqlite::params![gallery_id, old_path, rel_path, now, actor],
                        )?;
                        ctx.events.push(
                            Event::new("album", album_id, EventType::AlbumRenamed, actor)
                                .with_values(Some(old_path), Some(rel_path.clone()))
                                .with_comment(&format!("{moved} descendant albums moved")),
                        );
                    }
                    GraphWrite::OrphanAlbum { album_id } => {
                        tx.execute(
                            "UPDATE albums SET is_orphan = 1, updated_at = ?2, modified_by = ?3 WHERE id = ?1",
                            rusqlite::params![album_id, now, actor],
                        )?;
                        ctx.record_event("album", album_id, EventType::AlbumOrphaned);
                    }
                    GraphWrite::DeleteAlbum { album_id } => {
                        tx.execute("DELETE FROM albums WHERE id = ?1", [album_id])?;
                        ctx.record_event("album", album_id, EventType::AlbumDeleted);
                    }
                    GraphWrite::SetAlbumThumbnail { album_id, media_id } => {
                        tx.execute(
                            "UPDATE albums SET thumbnail_media_id = ?2 WHERE id = ?1",
                            rusqlite::params![album_id, media_id],
                        )?;
                    }
                    GraphWrite::InsertMedia(media) => {
                        insert_media(tx, media)?;
                        ctx.record_event("media_object", &media.id, EventType::MediaCreated);
                    }
                    GraphWrite::UpdateMedia(media) => {
                        update_media(tx, media)?;
                        ctx.record_event("media_object", &media.id, EventType::MediaUpdated);
                    }
                    GraphWrite::RelocateMedia { record, from } => {
                        update_media(tx, record)?;
                        ctx.record_change(
                            "media_object",
                            &record.id,
                            EventType::MediaRelocated,
                            Some(from.clone()),
                            Some(record.original.filename.clone()),
                        );
                    }
                    GraphWrite::OrphanMedia { media_id } => {
                        tx.execute(
                            "UPDATE media_objects SET is_orphan = 1, updated_at = ?2, modified_by = ?3 WHERE id = ?1",
                            rusqlite::params![media_id, now, actor],
                        )?;
                        tx.execute(
                            "UPDATE albums SET thumbnail_media_id = NULL WHERE thumbnail_media_id = ?1",
                            [media_id],
                        )?;
                        ctx.record_event("media_object", media_id, EventType::MediaOrphaned);
                    }
                    GraphWrite::DeleteMedia { media_id } => {
                        tx.execute(
                            "UPDATE albums SET thumbnail_media_id = NULL WHERE thumbnail_media_id = ?1",
                            [media_id],
                        )?;
                        tx.execute("DELETE FROM media_objects WHERE id = ?1", [media_id])?;
                        ctx.record_event("media_object", media_id, EventType::MediaDeleted);
                    }
                }
            }
            Ok(())
        })
    }
}
