//! Database schema definitions.
//!
//! One SQLite file holds both the permanent object graph (galleries, albums,
//! media objects, audit events) and the transient run-status store
//! (`gallery_locks`, `sync_runs`). The two halves are written through
//! separate connections but share this schema.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema.
///
/// Note: Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Object Graph
-- ====================

CREATE TABLE IF NOT EXISTS galleries (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    media_root TEXT NOT NULL,
    settings TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Albums: one row per directory below the media root
CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    gallery_id TEXT NOT NULL,
    parent_id TEXT,
    directory_name TEXT NOT NULL,
    rel_path TEXT NOT NULL,
    seq INTEGER NOT NULL DEFAULT 0,
    thumbnail_media_id TEXT,
    is_orphan INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    modified_by TEXT NOT NULL,
    FOREIGN KEY (gallery_id) REFERENCES galleries(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES albums(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_sibling_name ON albums(parent_id, directory_name);
CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_gallery_root ON albums(gallery_id) WHERE parent_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_albums_gallery_path ON albums(gallery_id, rel_path);

-- Media objects: one row per source file
CREATE TABLE IF NOT EXISTS media_objects (
    id TEXT PRIMARY KEY,
    gallery_id TEXT NOT NULL,
    album_id TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'generic',
    original_filename TEXT NOT NULL,
    original_width INTEGER,
    original_height INTEGER,
    original_size INTEGER NOT NULL DEFAULT 0,
    optimized_filename TEXT,
    optimized_width INTEGER,
    optimized_height INTEGER,
    optimized_size INTEGER,
    thumbnail_filename TEXT,
    thumbnail_width INTEGER,
    thumbnail_height INTEGER,
    thumbnail_size INTEGER,
    hash_key TEXT NOT NULL,
    file_mtime INTEGER NOT NULL DEFAULT 0,
    seq INTEGER NOT NULL DEFAULT 0,
    is_orphan INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    modified_by TEXT NOT NULL,
    FOREIGN KEY (gallery_id) REFERENCES galleries(id) ON DELETE CASCADE,
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_media_album ON media_objects(album_id);
CREATE INDEX IF NOT EXISTS idx_media_album_filename ON media_objects(album_id, original_filename);
CREATE INDEX IF NOT EXISTS idx_media_hash ON media_objects(album_id, hash_key);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);

-- ====================
-- Run-Status Store (transient)
-- ====================

-- Advisory lock: at most one active synchronization per gallery
CREATE TABLE IF NOT EXISTS gallery_locks (
    gallery_id TEXT PRIMARY KEY,
    owner_token TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Progress snapshots, overwritten in place while a run executes
CREATE TABLE IF NOT EXISTS sync_runs (
    gallery_id TEXT NOT NULL,
    synch_id TEXT NOT NULL,
    album_id TEXT NOT NULL,
    state TEXT NOT NULL,
    total_file_count INTEGER NOT NULL DEFAULT 0,
    current_file_index INTEGER NOT NULL DEFAULT 0,
    current_file_name TEXT,
    skipped TEXT NOT NULL DEFAULT '[]',
    stats TEXT NOT NULL DEFAULT '{}',
    error_info TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (gallery_id, synch_id),
    CHECK (current_file_index >= 0)
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_end ON sync_runs(end_time);
"#;

/// Apply pragmas and the schema to a connection.
///
/// Idempotent: safe to call on every open.
///
/// # Errors
///
/// Returns an error if a pragma or statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    // Record schema version
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
