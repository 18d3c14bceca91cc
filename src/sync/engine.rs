//! Synchronizer facade.
//!
//! `start` returns a synch id as soon as the run is registered; the run
//! itself continues on a background thread with its own graph connection.
//! Pollers go through the progress store and never wait on the run.

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::model::AlbumNode;
use crate::storage::SqliteStorage;
use crate::sync::pipeline::MediaPipeline;
use crate::sync::progress::ProgressPublisher;
use crate::sync::session::SyncSession;
use crate::sync::types::{SyncOptions, SyncStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Starts, observes and cancels synchronization runs.
pub struct Synchronizer {
    db_path: PathBuf,
    settings: SyncSettings,
    actor: String,
    publisher: ProgressPublisher,
    runs: Mutex<HashMap<String, JoinHandle<SyncStatus>>>,
}

impl Synchronizer {
    /// Open the engine on the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for invalid settings, or the database error
    /// if the progress store cannot be opened.
    pub fn new(db_path: &Path, settings: SyncSettings, actor: &str) -> Result<Self> {
        settings.validate()?;
        let publisher = ProgressPublisher::open(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            settings,
            actor: actor.to_string(),
            publisher,
            runs: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Start a run over `album_id` (the gallery root when `None`).
    ///
    /// # Errors
    ///
    /// Returns `GalleryNotFound`/`AlbumNotFound` for unknown ids and
    /// `SynchronizationInProgress` if the gallery already has an active run.
    pub fn start(
        &self,
        gallery_id: &str,
        album_id: Option<&str>,
        options: SyncOptions,
        pipeline: Box<dyn MediaPipeline>,
    ) -> Result<String> {
        let storage = SqliteStorage::open(&self.db_path)?;
        let gallery = storage.require_gallery(gallery_id)?;
        let album = resolve_start_album(&storage, gallery_id, album_id)?;
        drop(storage);

        let mut session = SyncSession::begin(
            self.publisher.clone(),
            gallery,
            album,
            options,
            &self.settings,
            &self.actor,
        )?;
        let synch_id = session.synch_id().to_string();

        let db_path = self.db_path.clone();
        let handle = std::thread::Builder::new()
            .name(format!("gsync-{}", &synch_id[..8.min(synch_id.len())]))
            .spawn(move || match SqliteStorage::open(&db_path) {
                Ok(mut storage) => session.run(&mut storage, pipeline.as_ref()),
                Err(err) => session.fail(&err),
            })?;

        self.runs_guard()?.insert(synch_id.clone(), handle);
        info!(gallery_id, synch_id = %synch_id, "Synchronization run dispatched");
        Ok(synch_id)
    }

    /// Latest snapshot of a run.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run never existed or was purged.
    pub fn get_status(&self, gallery_id: &str, synch_id: &str) -> Result<SyncStatus> {
        self.publisher.get_status(gallery_id, synch_id)
    }

    /// Request cancellation. Finished runs are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run never existed or was purged.
    pub fn abort(&self, gallery_id: &str, synch_id: &str) -> Result<SyncStatus> {
        self.publisher.abort(gallery_id, synch_id)
    }

    /// Poll until the run is terminal, calling `on_progress` with each snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SyncNotFound` if the run disappears, or `SyncFailed` if the
    /// run's thread exited without reaching a terminal state.
    pub fn wait_with<F>(&self, gallery_id: &str, synch_id: &str, mut on_progress: F) -> Result<SyncStatus>
    where
        F: FnMut(&SyncStatus),
    {
        loop {
            let status = self.get_status(gallery_id, synch_id)?;
            on_progress(&status);
            if status.state.is_terminal() {
                self.join(synch_id);
                return Ok(status);
            }

            let exited = self
                .runs_guard()?
                .get(synch_id)
                .is_some_and(JoinHandle::is_finished);
            if exited {
                self.join(synch_id);
                // The run may have published its final snapshot just now
                let status = self.get_status(gallery_id, synch_id)?;
                if status.state.is_terminal() {
                    return Ok(status);
                }
                return Err(Error::SyncFailed(format!(
                    "Run {synch_id} stopped without finishing"
                )));
            }

            std::thread::sleep(self.settings.poll_interval());
        }
    }

    /// Poll until the run is terminal.
    ///
    /// # Errors
    ///
    /// See [`Synchronizer::wait_with`].
    pub fn wait(&self, gallery_id: &str, synch_id: &str) -> Result<SyncStatus> {
        self.wait_with(gallery_id, synch_id, |_| {})
    }

    /// Retained runs of a gallery, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_runs(&self, gallery_id: &str) -> Result<Vec<SyncStatus>> {
        self.publisher.list_runs(gallery_id)
    }

    /// Drop finished runs past the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge(&self) -> Result<usize> {
        self.publisher.purge_expired(self.settings.status_retention())
    }

    fn join(&self, synch_id: &str) {
        let handle = match self.runs_guard() {
            Ok(mut runs) => runs.remove(synch_id),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            match handle.join() {
                Ok(status) => debug!(synch_id, state = %status.state, "Run thread joined"),
                Err(_) => error!(synch_id, "Run thread panicked"),
            }
        }
    }

    fn runs_guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, JoinHandle<SyncStatus>>>> {
        self.runs
            .lock()
            .map_err(|_| Error::Other("Run registry lock poisoned".into()))
    }
}

fn resolve_start_album(
    storage: &SqliteStorage,
    gallery_id: &str,
    album_id: Option<&str>,
) -> Result<AlbumNode> {
    let album = match album_id {
        Some(id) => storage
            .get_album(id)?
            .filter(|album| album.gallery_id == gallery_id && !album.is_orphan),
        None => storage.get_root_album(gallery_id)?,
    };
    album.ok_or_else(|| Error::AlbumNotFound {
        id: album_id.unwrap_or("root").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gallery;
    use crate::sync::pipeline::BasicPipeline;
    use crate::sync::types::SyncState;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Gallery, AlbumNode) {
        let db_dir = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let mut storage = SqliteStorage::open(&db_dir.path().join("gallery.db")).unwrap();
        let gallery = Gallery::new("Photos".into(), media.path().to_string_lossy().to_string());
        let root = storage.create_gallery(&gallery, "t").unwrap();
        (db_dir, media, gallery, root)
    }

    fn engine(db_dir: &TempDir) -> Synchronizer {
        let settings = SyncSettings {
            poll_interval_ms: 10,
            ..SyncSettings::default()
        };
        Synchronizer::new(&db_dir.path().join("gallery.db"), settings, "t").unwrap()
    }

    #[test]
    fn test_start_and_wait() {
        let (db_dir, media, gallery, root) = setup();
        fs::write(media.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir(media.path().join("trip")).unwrap();
        fs::write(media.path().join("trip/b.jpg"), b"b").unwrap();

        let engine = engine(&db_dir);
        let synch_id = engine
            .start(&gallery.id, None, SyncOptions::default(), Box::new(BasicPipeline))
            .unwrap();

        let mut last_index = 0;
        let status = engine
            .wait_with(&gallery.id, &synch_id, |s| {
                assert!(s.current_file_index >= last_index);
                assert!(s.current_file_index <= s.total_file_count);
                last_index = s.current_file_index;
            })
            .unwrap();

        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.album_id, root.id);
        assert_eq!(status.total_file_count, 2);
        assert_eq!(status.current_file_index, 2);

        let storage = SqliteStorage::open(&db_dir.path().join("gallery.db")).unwrap();
        assert_eq!(storage.list_albums(&gallery.id).unwrap().len(), 2);
        assert_eq!(engine.list_runs(&gallery.id).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_gallery_and_album() {
        let (db_dir, _media, gallery, _root) = setup();
        let engine = engine(&db_dir);

        let err = engine
            .start("gal_missing", None, SyncOptions::default(), Box::new(BasicPipeline))
            .unwrap_err();
        assert!(matches!(err, Error::GalleryNotFound { .. }));

        let err = engine
            .start(&gallery.id, Some("alb_missing"), SyncOptions::default(), Box::new(BasicPipeline))
            .unwrap_err();
        assert!(matches!(err, Error::AlbumNotFound { .. }));
    }

    #[test]
    fn test_album_of_other_gallery_rejected() {
        let (db_dir, media, gallery, _root) = setup();
        let mut storage = SqliteStorage::open(&db_dir.path().join("gallery.db")).unwrap();
        let other = Gallery::new("Other".into(), media.path().to_string_lossy().to_string());
        let other_root = storage.create_gallery(&other, "t").unwrap();

        let engine = engine(&db_dir);
        let err = engine
            .start(&gallery.id, Some(&other_root.id), SyncOptions::default(), Box::new(BasicPipeline))
            .unwrap_err();
        assert!(matches!(err, Error::AlbumNotFound { .. }));
    }

    #[test]
    fn test_status_of_unknown_run() {
        let (db_dir, _media, gallery, _root) = setup();
        let engine = engine(&db_dir);
        assert!(matches!(
            engine.get_status(&gallery.id, "nope"),
            Err(Error::SyncNotFound { .. })
        ));
        assert!(matches!(
            engine.abort(&gallery.id, "nope"),
            Err(Error::SyncNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let db_dir = TempDir::new().unwrap();
        let settings = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };
        let result = Synchronizer::new(&db_dir.path().join("gallery.db"), settings, "t");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
