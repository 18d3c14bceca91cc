//! Run-status store and gallery lock.
//!
//! Progress snapshots live in `sync_runs`, keyed by (gallery id, synch id),
//! and are overwritten in place while a run executes. Pollers read them
//! through their own handle, so a status request never touches the run's
//! graph connection. The same store carries the cooperative cancellation
//! flag and the per-gallery advisory lock.

use crate::error::{Error, Result};
use crate::storage::schema::apply_schema;
use crate::sync::types::{percent_complete, SkipEntry, SyncState, SyncStats, SyncStatus};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const STATUS_COLUMNS: &str = "gallery_id, synch_id, album_id, state, total_file_count, \
     current_file_index, current_file_name, skipped, stats, error_info, cancel_requested, \
     start_time, end_time, updated_at";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_possible_wrap)]
fn count_param(n: usize) -> i64 {
    n as i64
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<SyncStatus> {
    let state: String = row.get(3)?;
    let state = state.parse::<SyncState>().unwrap_or(SyncState::Error);
    let total = usize::try_from(row.get::<_, i64>(4)?).unwrap_or(0);
    let index = usize::try_from(row.get::<_, i64>(5)?).unwrap_or(0);
    let skipped: Vec<SkipEntry> = json_column(row, 7)?;
    let stats: SyncStats = json_column(row, 8)?;

    Ok(SyncStatus {
        gallery_id: row.get(0)?,
        synch_id: row.get(1)?,
        album_id: row.get(2)?,
        state,
        total_file_count: total,
        current_file_index: index,
        current_file_name: row.get(6)?,
        percent_complete: percent_complete(index, total, state),
        skipped_files: skipped,
        stats,
        error_info: row.get(9)?,
        cancel_requested: row.get::<_, i64>(10)? != 0,
        start_time: row.get(11)?,
        end_time: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Handle on the run-status store. Cheap to clone; clones share one connection.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressPublisher {
    /// Open the store in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Other("Progress store lock poisoned".into()))?;
        f(&mut guard)
    }

    // ==================
    // Gallery Lock
    // ==================

    /// Take the gallery lock for `owner` if it is free or expired.
    ///
    /// A run whose lock expired is marked as abandoned. Returns `false` if
    /// another owner holds a live lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn try_acquire_lock(&self, gallery_id: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_ms();

            let current: Option<(String, i64)> = tx
                .query_row(
                    "SELECT owner_token, expires_at FROM gallery_locks WHERE gallery_id = ?1",
                    [gallery_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((holder, expires_at)) = current {
                if expires_at > now {
                    return Ok(false);
                }
                warn!(gallery_id, synch_id = %holder, "Taking over expired gallery lock");
                tx.execute(
                    "UPDATE sync_runs
                     SET state = 'error', error_info = 'Run abandoned: gallery lock expired',
                         end_time = ?3, updated_at = ?3
                     WHERE gallery_id = ?1 AND synch_id = ?2 AND end_time IS NULL",
                    rusqlite::params![gallery_id, holder, now],
                )?;
            }

            tx.execute(
                "INSERT INTO gallery_locks (gallery_id, owner_token, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(gallery_id) DO UPDATE SET
                     owner_token = excluded.owner_token,
                     acquired_at = excluded.acquired_at,
                     expires_at = excluded.expires_at",
                rusqlite::params![gallery_id, owner, now, now + millis(ttl)],
            )?;
            tx.commit()?;

            debug!(gallery_id, owner, "Gallery lock acquired");
            Ok(true)
        })
    }

    /// Push the lock's expiry forward. Returns `false` if `owner` lost the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn renew_lock(&self, gallery_id: &str, owner: &str, ttl: Duration) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE gallery_locks SET expires_at = ?3 WHERE gallery_id = ?1 AND owner_token = ?2",
                rusqlite::params![gallery_id, owner, now_ms() + millis(ttl)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Release the lock if `owner` holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn release_lock(&self, gallery_id: &str, owner: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM gallery_locks WHERE gallery_id = ?1 AND owner_token = ?2",
                rusqlite::params![gallery_id, owner],
            )?;
            if changed == 1 {
                debug!(gallery_id, owner, "Gallery lock released");
            }
            Ok(changed == 1)
        })
    }

    /// Current holder of a live lock on the gallery.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lock_owner(&self, gallery_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let owner = conn
                .query_row(
                    "SELECT owner_token FROM gallery_locks WHERE gallery_id = ?1 AND expires_at > ?2",
                    rusqlite::params![gallery_id, now_ms()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner)
        })
    }

    // ==================
    // Run Snapshots
    // ==================

    /// Insert the first snapshot of a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate synch id).
    pub fn create(&self, status: &SyncStatus) -> Result<()> {
        let skipped = serde_json::to_string(&status.skipped_files)?;
        let stats = serde_json::to_string(&status.stats)?;

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sync_runs ({STATUS_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                rusqlite::params![
                    status.gallery_id,
                    status.synch_id,
                    status.album_id,
                    status.state.as_str(),
                    count_param(status.total_file_count),
                    count_param(status.current_file_index),
                    status.current_file_name,
                    skipped,
                    stats,
                    status.error_info,
                    i64::from(status.cancel_requested),
                    status.start_time,
                    status.end_time,
                    now_ms(),
                ],
            )?;
            Ok(())
        })
    }

    /// Overwrite a run's snapshot.
    ///
    /// The stored index never decreases and a pending cancellation is never
    /// cleared by an update. A finished record is never rewritten, so a run
    /// that was abandoned on lock takeover stays in Error.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run was purged.
    pub fn update(&self, status: &SyncStatus) -> Result<()> {
        let skipped = serde_json::to_string(&status.skipped_files)?;
        let stats = serde_json::to_string(&status.stats)?;

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sync_runs SET
                     state = ?3,
                     total_file_count = ?4,
                     current_file_index = MAX(current_file_index, ?5),
                     current_file_name = ?6,
                     skipped = ?7,
                     stats = ?8,
                     error_info = ?9,
                     end_time = ?10,
                     updated_at = ?11
                 WHERE gallery_id = ?1 AND synch_id = ?2 AND end_time IS NULL",
                rusqlite::params![
                    status.gallery_id,
                    status.synch_id,
                    status.state.as_str(),
                    count_param(status.total_file_count),
                    count_param(status.current_file_index),
                    status.current_file_name,
                    skipped,
                    stats,
                    status.error_info,
                    status.end_time,
                    now_ms(),
                ],
            )?;
            Ok(changed)
        })
        .and_then(|changed| {
            if changed == 0 {
                // Either purged (NotFound) or already finished
                let stored = self.get_status(&status.gallery_id, &status.synch_id)?;
                debug!(
                    synch_id = %status.synch_id,
                    stored = %stored.state,
                    "Update ignored for finished run"
                );
            }
            Ok(())
        })
    }

    /// Latest snapshot of a run.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run never existed or was purged.
    pub fn get_status(&self, gallery_id: &str, synch_id: &str) -> Result<SyncStatus> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {STATUS_COLUMNS} FROM sync_runs WHERE gallery_id = ?1 AND synch_id = ?2"
                ),
                [gallery_id, synch_id],
                status_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::SyncNotFound {
                gallery_id: gallery_id.to_string(),
                synch_id: synch_id.to_string(),
            })
        })
    }

    /// Request cooperative cancellation. A no-op for terminal runs.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run never existed or was purged.
    pub fn abort(&self, gallery_id: &str, synch_id: &str) -> Result<SyncStatus> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE sync_runs SET cancel_requested = 1, updated_at = ?3
                 WHERE gallery_id = ?1 AND synch_id = ?2 AND end_time IS NULL",
                rusqlite::params![gallery_id, synch_id, now_ms()],
            )?)
        })?;

        let status = self.get_status(gallery_id, synch_id)?;
        if changed == 0 {
            debug!(gallery_id, synch_id, state = %status.state, "Abort ignored for finished run");
        } else {
            info!(gallery_id, synch_id, "Cancellation requested");
        }
        Ok(status)
    }

    /// Whether cancellation was requested for a run.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run was purged.
    pub fn is_cancel_requested(&self, gallery_id: &str, synch_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT cancel_requested FROM sync_runs WHERE gallery_id = ?1 AND synch_id = ?2",
                [gallery_id, synch_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|flag| flag != 0)
            .ok_or_else(|| Error::SyncNotFound {
                gallery_id: gallery_id.to_string(),
                synch_id: synch_id.to_string(),
            })
        })
    }

    /// Retained runs of a gallery, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_runs(&self, gallery_id: &str) -> Result<Vec<SyncStatus>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM sync_runs WHERE gallery_id = ?1
                 ORDER BY start_time DESC, synch_id"
            ))?;
            let rows = stmt.query_map([gallery_id], status_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete terminal runs that ended more than `retention` ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired(&self, retention: Duration) -> Result<usize> {
        let cutoff = now_ms() - millis(retention);
        self.with_conn(|conn| {
            let purged = conn.execute(
                "DELETE FROM sync_runs WHERE end_time IS NOT NULL AND end_time <= ?1",
                [cutoff],
            )?;
            if purged > 0 {
                debug!(purged, "Purged expired synchronization runs");
            }
            Ok(purged)
        })
    }
}
