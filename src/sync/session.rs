//! Synchronization session.
//!
//! One session drives one run through its state machine:
//!
//! ```text
//! NotStarted → Initializing → Walking → Reconciling → ProcessingFiles → Finalizing → Completed
//!                  └──────────────┴───────────┴──────────────┴──────────────┴──→ Error | Cancelled
//! ```
//!
//! [`SyncSession::begin`] takes the gallery lock and creates the run record
//! on the caller's thread so a busy gallery fails fast. [`SyncSession::run`]
//! does the rest and can be moved to a background thread.
//!
//! Per-item pipeline failures become skip entries. Anything else (database,
//! unwritable destination, a lost lock) ends the run in Error after the
//! in-flight batch is discarded. Cancellation is checked before every action;
//! whatever was already processed is committed and kept.

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::model::{AlbumNode, Gallery, MediaKind, MediaObjectRecord, OrphanPolicy};
use crate::storage::{GraphWrite, LockLease};
use crate::sync::batch::{GalleryStore, TransactionCoordinator};
use crate::sync::pipeline::{MediaPipeline, ProcessFailure, ProcessRequest, ProcessedMedia};
use crate::sync::progress::ProgressPublisher;
use crate::sync::reconcile::{Action, Reconciler, UpdateKind};
use crate::sync::types::{
    percent_complete, SkipEntry, SkipList, SkipReason, SyncOptions, SyncState, SyncStats,
    SyncStatus,
};
use crate::sync::walker::{DirectoryWalker, WalkEntry, WalkItem};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How the per-action loop ended.
enum LoopEnd {
    Exhausted,
    Cancelled,
}

/// Content hashes per album, for the duplicate-content rule.
#[derive(Default)]
struct HashIndex {
    by_album: HashMap<String, HashMap<String, String>>,
}

impl HashIndex {
    fn holder(&self, album_id: &str, hash: &str) -> Option<&str> {
        self.by_album
            .get(album_id)
            .and_then(|hashes| hashes.get(hash))
            .map(String::as_str)
    }

    fn insert(&mut self, album_id: &str, hash: &str, media_id: &str) {
        self.by_album
            .entry(album_id.to_string())
            .or_default()
            .insert(hash.to_string(), media_id.to_string());
    }

    fn remove(&mut self, album_id: &str, hash: &str, media_id: &str) {
        if let Some(hashes) = self.by_album.get_mut(album_id) {
            if hashes.get(hash).is_some_and(|id| id == media_id) {
                hashes.remove(hash);
            }
        }
    }
}

/// State carried across the per-action loop.
struct Workspace {
    hashes: HashIndex,
    album_paths: HashMap<String, String>,
    albums_with_cover: HashSet<String>,
}

/// One synchronization run.
pub struct SyncSession {
    publisher: ProgressPublisher,
    gallery: Gallery,
    start_album: AlbumNode,
    options: SyncOptions,
    batch_size: usize,
    lock_ttl: Duration,
    actor: String,
    status: SyncStatus,
    skips: SkipList,
    lock_held: bool,
}

impl SyncSession {
    /// Acquire the gallery lock and create the run record.
    ///
    /// # Errors
    ///
    /// Returns `SynchronizationInProgress` if another run holds the gallery,
    /// or the store's error if the run record cannot be created.
    pub fn begin(
        publisher: ProgressPublisher,
        gallery: Gallery,
        start_album: AlbumNode,
        options: SyncOptions,
        settings: &SyncSettings,
        actor: &str,
    ) -> Result<Self> {
        let synch_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        let mut session = Self {
            publisher,
            status: SyncStatus {
                gallery_id: gallery.id.clone(),
                synch_id: synch_id.clone(),
                album_id: start_album.id.clone(),
                state: SyncState::NotStarted,
                total_file_count: 0,
                current_file_index: 0,
                current_file_name: None,
                percent_complete: 0,
                skipped_files: Vec::new(),
                stats: SyncStats::default(),
                error_info: None,
                cancel_requested: false,
                start_time: now,
                end_time: None,
                updated_at: now,
            },
            gallery,
            start_album,
            options,
            batch_size: settings.batch_size,
            lock_ttl: settings.lock_ttl(),
            actor: actor.to_string(),
            skips: SkipList::new(),
            lock_held: false,
        };

        session.publisher.purge_expired(settings.status_retention())?;

        let gallery_id = session.gallery.id.clone();
        if !session
            .publisher
            .try_acquire_lock(&gallery_id, &synch_id, session.lock_ttl)?
        {
            let active = session.publisher.lock_owner(&gallery_id)?.unwrap_or_default();
            warn!(gallery_id = %gallery_id, active = %active, "Synchronization already in progress");
            return Err(Error::SynchronizationInProgress {
                gallery_id,
                synch_id: active,
            });
        }
        session.lock_held = true;

        session.transition(SyncState::Initializing);
        session.publisher.create(&session.status)?;

        info!(
            gallery_id = %session.gallery.id,
            synch_id = %synch_id,
            album = %session.start_album.rel_path,
            "Synchronization started"
        );
        Ok(session)
    }

    #[must_use]
    pub fn synch_id(&self) -> &str {
        &self.status.synch_id
    }

    #[must_use]
    pub fn gallery_id(&self) -> &str {
        &self.gallery.id
    }

    #[must_use]
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Drive the run to a terminal state and return the final snapshot.
    pub fn run<S: GalleryStore + ?Sized>(
        &mut self,
        store: &mut S,
        pipeline: &dyn MediaPipeline,
    ) -> SyncStatus {
        match self.execute(store, pipeline) {
            Ok(LoopEnd::Exhausted) => self.complete(),
            Ok(LoopEnd::Cancelled) => self.finish(SyncState::Cancelled),
            Err(err) => self.fail(&err),
        }
    }

    /// End the run in Error with `err` as its cause.
    pub fn fail(&mut self, err: &Error) -> SyncStatus {
        error!(
            gallery_id = %self.gallery.id,
            synch_id = %self.status.synch_id,
            state = %self.status.state,
            error = %err,
            "Synchronization failed"
        );
        self.status.error_info = Some(err.to_string());
        self.finish(SyncState::Error)
    }

    fn execute<S: GalleryStore + ?Sized>(
        &mut self,
        store: &mut S,
        pipeline: &dyn MediaPipeline,
    ) -> Result<LoopEnd> {
        let media_root = PathBuf::from(&self.gallery.media_root);
        let include = self.options.include_child_albums;

        self.advance(SyncState::Walking)?;
        let walker = DirectoryWalker::new(
            &media_root,
            &self.start_album.rel_path,
            include,
            self.gallery.settings.skip_hidden,
        )?;
        // The walk is taken once; later disk changes wait for the next run
        let mut items: Vec<WalkItem> = Vec::new();
        let mut renewed = Instant::now();
        for item in walker.walk() {
            items.push(item);
            if renewed.elapsed() >= self.lock_ttl / 3 {
                self.renew_lock()?;
                renewed = Instant::now();
            }
        }
        debug!(synch_id = %self.status.synch_id, entries = items.len(), "Walk finished");

        self.advance(SyncState::Reconciling)?;
        let snapshot = store.load_subtree(&self.start_album.id, include)?;
        let plan = Reconciler::new(
            &media_root,
            &self.gallery.settings,
            &self.start_album,
            &snapshot,
            self.options,
            &self.actor,
        )
        .reconcile(&items);
        info!(
            synch_id = %self.status.synch_id,
            actions = plan.actions.len(),
            files = plan.total_file_count,
            hashed = plan.files_hashed,
            "Reconcile plan ready"
        );

        let mut workspace = Workspace {
            hashes: HashIndex::default(),
            album_paths: snapshot
                .albums
                .iter()
                .map(|a| (a.id.clone(), a.rel_path.clone()))
                .collect(),
            albums_with_cover: snapshot
                .albums
                .iter()
                .filter(|a| a.thumbnail_media_id.is_some())
                .map(|a| a.id.clone())
                .collect(),
        };
        for media in snapshot.media.iter().filter(|m| !m.is_orphan) {
            workspace.hashes.insert(&media.album_id, &media.hash_key, &media.id);
        }

        self.status.total_file_count = plan.total_file_count;
        self.status.current_file_index = 0;
        self.advance(SyncState::ProcessingFiles)?;

        let lease = LockLease::new(&self.gallery.id, &self.status.synch_id, self.lock_ttl);
        let mut coordinator =
            TransactionCoordinator::new(store, &self.actor, self.batch_size).with_lease(lease);
        let outcome = self.process_actions(
            &mut coordinator,
            plan.actions,
            &media_root,
            pipeline,
            &mut workspace,
        );

        let end = match outcome {
            Ok(end) => end,
            Err(err) => {
                let dropped = coordinator.rollback();
                debug!(dropped, "In-flight batch discarded");
                self.record_commits(&coordinator);
                return Err(err);
            }
        };

        // Commit what was processed, including on cancellation
        let committed = coordinator.commit();
        self.record_commits(&coordinator);
        committed?;
        Ok(end)
    }

    fn record_commits<S: GalleryStore + ?Sized>(&mut self, coordinator: &TransactionCoordinator<'_, S>) {
        self.status.stats.batches_committed = coordinator.batches_committed();
        self.status.stats.writes_committed = coordinator.writes_committed();
    }

    fn process_actions<S: GalleryStore + ?Sized>(
        &mut self,
        coordinator: &mut TransactionCoordinator<'_, S>,
        actions: Vec<Action>,
        media_root: &Path,
        pipeline: &dyn MediaPipeline,
        workspace: &mut Workspace,
    ) -> Result<LoopEnd> {
        for action in actions {
            if self
                .publisher
                .is_cancel_requested(&self.gallery.id, &self.status.synch_id)?
            {
                info!(
                    synch_id = %self.status.synch_id,
                    index = self.status.current_file_index,
                    pending = coordinator.staged_len(),
                    "Cancellation observed"
                );
                self.status.cancel_requested = true;
                return Ok(LoopEnd::Cancelled);
            }

            let is_file = action.is_file_item();
            let name = action.display_name().to_string();
            let writes = self.apply(action, media_root, pipeline, workspace)?;
            coordinator.stage_all(writes)?;
            self.record_commits(coordinator);

            if is_file {
                self.status.current_file_index += 1;
                self.status.current_file_name = Some(name);
                self.publish()?;
            }
        }
        Ok(LoopEnd::Exhausted)
    }

    /// Turn one action into graph writes. Per-item failures become skips.
    fn apply(
        &mut self,
        action: Action,
        media_root: &Path,
        pipeline: &dyn MediaPipeline,
        workspace: &mut Workspace,
    ) -> Result<Vec<GraphWrite>> {
        let delete = self.gallery.settings.orphan_policy == OrphanPolicy::Delete;

        match action {
            Action::CreateAlbum { album, warning } => {
                if let Some(warning) = warning {
                    self.skip(warning);
                }
                debug!(path = %album.rel_path, "Creating album");
                workspace
                    .album_paths
                    .insert(album.id.clone(), album.rel_path.clone());
                self.status.stats.albums_created += 1;
                Ok(vec![GraphWrite::InsertAlbum(album)])
            }

            Action::RestoreAlbum { album_id, rel_path } => {
                debug!(path = %rel_path, "Restoring album");
                self.status.stats.albums_restored += 1;
                Ok(vec![GraphWrite::RestoreAlbum { album_id }])
            }

            Action::RenameAlbum {
                album_id,
                from,
                directory_name,
                rel_path,
            } => {
                debug!(from = %from, to = %rel_path, "Album directory renamed");
                workspace.album_paths.insert(album_id.clone(), rel_path.clone());
                self.status.stats.albums_renamed += 1;
                Ok(vec![GraphWrite::RenameAlbum {
                    album_id,
                    directory_name,
                    rel_path,
                }])
            }

            Action::CreateMediaObject {
                entry,
                album_id,
                kind,
                seq,
                warning,
            } => {
                if let Some(warning) = warning {
                    self.skip(warning);
                }
                let request = self.request(media_root, &entry, &album_id, kind, None);
                let Some(processed) = self.run_pipeline(pipeline, &request, &entry)? else {
                    return Ok(Vec::new());
                };
                if let Some(holder) = workspace.hashes.holder(&album_id, &processed.hash_key) {
                    let message = format!("Same content as media object {holder}");
                    self.skip(SkipEntry::new(&entry.rel_path, SkipReason::DuplicateContent, message));
                    return Ok(Vec::new());
                }

                let now = chrono::Utc::now().timestamp_millis();
                let record = MediaObjectRecord {
                    id: MediaObjectRecord::new_id(),
                    gallery_id: self.gallery.id.clone(),
                    album_id: album_id.clone(),
                    kind: processed.kind,
                    original: processed.original,
                    optimized: processed.optimized,
                    thumbnail: processed.thumbnail,
                    hash_key: processed.hash_key,
                    file_mtime: entry.mtime,
                    seq,
                    is_orphan: false,
                    created_at: now,
                    created_by: self.actor.clone(),
                    updated_at: now,
                    modified_by: self.actor.clone(),
                };
                workspace.hashes.insert(&album_id, &record.hash_key, &record.id);
                self.status.stats.media_created += 1;

                let mut writes = Vec::with_capacity(2);
                let cover = (record.kind == MediaKind::Image
                    && workspace.albums_with_cover.insert(album_id.clone()))
                .then(|| GraphWrite::SetAlbumThumbnail {
                    album_id,
                    media_id: record.id.clone(),
                });
                writes.push(GraphWrite::InsertMedia(record));
                writes.extend(cover);
                Ok(writes)
            }

            Action::UpdateMediaObject {
                record,
                entry,
                album_id,
                kind,
                seq,
                change,
                hash,
            } => {
                let mut updated = record.clone();
                updated.album_id = album_id.clone();
                updated.kind = kind;
                updated.seq = seq;
                updated.is_orphan = false;
                updated.file_mtime = entry.mtime;
                updated.original.filename = entry.name.clone();
                updated.original.size = entry.size;
                updated.updated_at = chrono::Utc::now().timestamp_millis();
                updated.modified_by = self.actor.clone();

                if change.needs_pipeline() {
                    let request = self.request(media_root, &entry, &album_id, kind, Some(&record));
                    let Some(processed) = self.run_pipeline(pipeline, &request, &entry)? else {
                        return Ok(Vec::new());
                    };
                    updated.kind = processed.kind;
                    updated.hash_key = processed.hash_key;
                    updated.original = processed.original;
                    updated.optimized = processed.optimized;
                    updated.thumbnail = processed.thumbnail;
                } else if let Some(hash) = hash {
                    updated.hash_key = hash;
                }

                if let Some(holder) = workspace.hashes.holder(&album_id, &updated.hash_key) {
                    if holder != record.id {
                        let message = format!("Same content as media object {holder}");
                        self.skip(SkipEntry::new(&entry.rel_path, SkipReason::DuplicateContent, message));
                        return Ok(Vec::new());
                    }
                }
                workspace.hashes.remove(&record.album_id, &record.hash_key, &record.id);
                workspace.hashes.insert(&album_id, &updated.hash_key, &record.id);

                debug!(path = %entry.rel_path, change = change.as_str(), "Updating media object");
                if change == UpdateKind::Relocate {
                    self.status.stats.media_relocated += 1;
                    let old_dir = workspace
                        .album_paths
                        .get(&record.album_id)
                        .map_or("", String::as_str);
                    let from = if old_dir.is_empty() {
                        record.filename().to_string()
                    } else {
                        format!("{old_dir}/{}", record.filename())
                    };
                    Ok(vec![GraphWrite::RelocateMedia { record: updated, from }])
                } else {
                    self.status.stats.media_updated += 1;
                    Ok(vec![GraphWrite::UpdateMedia(updated)])
                }
            }

            Action::Unchanged { .. } => {
                self.status.stats.media_unchanged += 1;
                Ok(Vec::new())
            }

            Action::Skip(entry) => {
                self.skip(entry);
                Ok(Vec::new())
            }

            Action::MarkOrphanAlbum { album_id, rel_path } => {
                debug!(path = %rel_path, delete, "Album no longer on disk");
                self.status.stats.albums_orphaned += 1;
                Ok(vec![if delete {
                    GraphWrite::DeleteAlbum { album_id }
                } else {
                    GraphWrite::OrphanAlbum { album_id }
                }])
            }

            Action::MarkOrphanMediaObject { media_id, rel_path } => {
                debug!(path = %rel_path, delete, "Media file no longer on disk");
                self.status.stats.media_orphaned += 1;
                Ok(vec![if delete {
                    GraphWrite::DeleteMedia { media_id }
                } else {
                    GraphWrite::OrphanMedia { media_id }
                }])
            }
        }
    }

    fn request<'r>(
        &self,
        media_root: &Path,
        entry: &'r WalkEntry,
        album_id: &'r str,
        kind: MediaKind,
        existing: Option<&'r MediaObjectRecord>,
    ) -> ProcessRequest<'r> {
        ProcessRequest {
            source: media_root.join(&entry.rel_path),
            rel_path: &entry.rel_path,
            file_name: &entry.name,
            destination_album_id: album_id,
            kind,
            options: self.options,
            existing,
        }
    }

    /// Run the pipeline; `Ok(None)` means the item was skipped.
    fn run_pipeline(
        &mut self,
        pipeline: &dyn MediaPipeline,
        request: &ProcessRequest<'_>,
        entry: &WalkEntry,
    ) -> Result<Option<ProcessedMedia>> {
        match pipeline.process(request) {
            Ok(processed) => Ok(Some(processed)),
            Err(failure) => match failure.skip_reason() {
                Some(reason) => {
                    self.skip(SkipEntry::new(&entry.rel_path, reason, failure.to_string()));
                    Ok(None)
                }
                None => Err(Error::SyncFailed(failure_message(&failure, entry))),
            },
        }
    }

    fn skip(&mut self, entry: SkipEntry) {
        warn!(
            synch_id = %self.status.synch_id,
            path = %entry.rel_path,
            reason = %entry.reason,
            "Skipped: {}",
            entry.message
        );
        self.skips.push(entry);
    }

    fn transition(&mut self, next: SyncState) {
        debug_assert!(
            self.status.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.status.state,
            next
        );
        debug!(synch_id = %self.status.synch_id, from = %self.status.state, to = %next, "State transition");
        self.status.state = next;
    }

    fn advance(&mut self, next: SyncState) -> Result<()> {
        self.transition(next);
        self.publish()
    }

    /// Write the snapshot and keep the gallery lock alive.
    fn publish(&mut self) -> Result<()> {
        self.status.skipped_files = self.skips.entries().to_vec();
        self.status.stats.skipped = self.skips.len();
        self.status.percent_complete = percent_complete(
            self.status.current_file_index,
            self.status.total_file_count,
            self.status.state,
        );
        self.status.updated_at = chrono::Utc::now().timestamp_millis();
        self.publisher.update(&self.status)?;

        if !self.status.state.is_terminal() {
            self.renew_lock()?;
        }
        Ok(())
    }

    /// Push the lock's expiry forward, failing if another run took it.
    fn renew_lock(&mut self) -> Result<()> {
        if !self.lock_held {
            return Ok(());
        }
        let renewed =
            self.publisher
                .renew_lock(&self.gallery.id, &self.status.synch_id, self.lock_ttl)?;
        if !renewed {
            self.lock_held = false;
            return Err(Error::lock_lost());
        }
        Ok(())
    }

    fn complete(&mut self) -> SyncStatus {
        self.transition(SyncState::Finalizing);
        if let Err(err) = self.publish() {
            return self.fail(&err);
        }
        self.finish(SyncState::Completed)
    }

    /// Release the lock, then publish the terminal snapshot.
    fn finish(&mut self, terminal: SyncState) -> SyncStatus {
        self.release_lock();
        if self.status.state.is_terminal() {
            return self.status.clone();
        }
        self.transition(terminal);
        self.status.end_time = Some(chrono::Utc::now().timestamp_millis());
        if let Err(err) = self.publish() {
            error!(synch_id = %self.status.synch_id, error = %err, "Failed to publish final status");
        }

        info!(
            gallery_id = %self.gallery.id,
            synch_id = %self.status.synch_id,
            state = %self.status.state,
            processed = self.status.current_file_index,
            total = self.status.total_file_count,
            skipped = self.skips.len(),
            "Synchronization finished"
        );
        self.status.clone()
    }

    fn release_lock(&mut self) {
        if !self.lock_held {
            return;
        }
        self.lock_held = false;
        if let Err(err) = self
            .publisher
            .release_lock(&self.gallery.id, &self.status.synch_id)
        {
            warn!(gallery_id = %self.gallery.id, error = %err, "Failed to release gallery lock");
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if !self.status.state.is_terminal() && self.status.state != SyncState::NotStarted {
            self.fail(&Error::SyncFailed("Session ended before finishing".into()));
        }
        self.release_lock();
    }
}

fn failure_message(failure: &ProcessFailure, entry: &WalkEntry) -> String {
    format!("{failure} (while processing {})", entry.rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rendition;
    use crate::storage::{GallerySnapshot, SqliteStorage};
    use crate::sync::pipeline::BasicPipeline;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Env {
        media: TempDir,
        storage: SqliteStorage,
        publisher: ProgressPublisher,
        gallery: Gallery,
        root: AlbumNode,
        _db: TempDir,
    }

    impl Env {
        fn new() -> Self {
            let media = TempDir::new().unwrap();
            // Graph and progress share one file so batches can check the lock
            let db = TempDir::new().unwrap();
            let db_path = db.path().join("gallery.db");
            let mut storage = SqliteStorage::open(&db_path).unwrap();
            let gallery = Gallery::new(
                "Test".into(),
                media.path().to_string_lossy().to_string(),
            );
            let root = storage.create_gallery(&gallery, "t").unwrap();
            Self {
                media,
                storage,
                publisher: ProgressPublisher::open(&db_path).unwrap(),
                gallery,
                root,
                _db: db,
            }
        }

        fn write(&self, rel: &str, data: &[u8]) {
            let path = self.media.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, data).unwrap();
        }

        fn settings(batch_size: usize) -> SyncSettings {
            SyncSettings {
                batch_size,
                ..SyncSettings::default()
            }
        }

        fn begin(&self, batch_size: usize) -> Result<SyncSession> {
            self.begin_at(self.root.clone(), batch_size)
        }

        fn begin_at(&self, album: AlbumNode, batch_size: usize) -> Result<SyncSession> {
            SyncSession::begin(
                self.publisher.clone(),
                self.gallery.clone(),
                album,
                SyncOptions::default(),
                &Self::settings(batch_size),
                "t",
            )
        }

        fn sync_with(&mut self, pipeline: &dyn MediaPipeline, batch_size: usize) -> SyncStatus {
            let mut session = self.begin(batch_size).unwrap();
            session.run(&mut self.storage, pipeline)
        }

        fn media_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self
                .storage
                .list_media_objects(&self.root.id)
                .unwrap()
                .into_iter()
                .filter(|m| !m.is_orphan)
                .map(|m| m.original.filename)
                .collect();
            names.sort();
            names
        }
    }

    /// Counts calls and optionally fails files by name.
    struct FakePipeline {
        calls: AtomicUsize,
        corrupt: Vec<&'static str>,
        unwritable: Vec<&'static str>,
    }

    impl FakePipeline {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                corrupt: Vec::new(),
                unwritable: Vec::new(),
            }
        }
    }

    impl MediaPipeline for FakePipeline {
        fn process(&self, request: &ProcessRequest<'_>) -> std::result::Result<ProcessedMedia, ProcessFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.corrupt.contains(&request.file_name) {
                return Err(ProcessFailure::CorruptFile("bad header".into()));
            }
            if self.unwritable.contains(&request.file_name) {
                return Err(ProcessFailure::DestinationUnwritable("read-only volume".into()));
            }
            let mut processed = BasicPipeline.process(request)?;
            processed.thumbnail = Some(Rendition {
                filename: format!("zThumb_{}", request.file_name),
                width: Some(115),
                height: Some(86),
                size: 1,
            });
            Ok(processed)
        }
    }

    /// Aborts the active run of a gallery while processing its Nth file.
    struct AbortingPipeline {
        publisher: ProgressPublisher,
        gallery_id: String,
        abort_at: usize,
        calls: AtomicUsize,
    }

    impl MediaPipeline for AbortingPipeline {
        fn process(&self, request: &ProcessRequest<'_>) -> std::result::Result<ProcessedMedia, ProcessFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.abort_at {
                let owner = self.publisher.lock_owner(&self.gallery_id).unwrap().unwrap();
                self.publisher.abort(&self.gallery_id, &owner).unwrap();
            }
            BasicPipeline.process(request)
        }
    }

    /// Fails the Nth batch commit, as if the database went away.
    struct FlakyStore<'a> {
        inner: &'a mut SqliteStorage,
        fail_on: usize,
        calls: usize,
    }

    impl GalleryStore for FlakyStore<'_> {
        fn load_subtree(&self, album_id: &str, include_children: bool) -> Result<GallerySnapshot> {
            self.inner.load_subtree(album_id, include_children)
        }

        fn apply_batch(
            &mut self,
            writes: &[GraphWrite],
            actor: &str,
            lease: Option<&LockLease>,
        ) -> Result<()> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(Error::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                    Some("disk I/O error".into()),
                )));
            }
            self.inner.apply_writes_with_lease(writes, actor, lease)
        }
    }

    /// Lets another run steal the gallery lock while the first file is processed.
    struct StealingPipeline {
        publisher: ProgressPublisher,
        gallery_id: String,
        calls: AtomicUsize,
    }

    impl MediaPipeline for StealingPipeline {
        fn process(&self, request: &ProcessRequest<'_>) -> std::result::Result<ProcessedMedia, ProcessFailure> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let owner = self.publisher.lock_owner(&self.gallery_id).unwrap().unwrap();
                self.publisher.release_lock(&self.gallery_id, &owner).unwrap();
                assert!(self
                    .publisher
                    .try_acquire_lock(&self.gallery_id, "intruder", Duration::from_secs(60))
                    .unwrap());
            }
            BasicPipeline.process(request)
        }
    }

    #[test]
    fn test_new_identical_and_unsupported_files() {
        let mut env = Env::new();
        env.write("same.jpg", b"already synced");
        let first = env.sync_with(&FakePipeline::new(), 50);
        assert_eq!(first.state, SyncState::Completed);

        env.write("a.jpg", b"a");
        env.write("b.png", b"bb");
        env.write("c.gif", b"ccc");
        env.write("setup.exe", b"MZ");

        let pipeline = FakePipeline::new();
        let status = env.sync_with(&pipeline, 50);

        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.total_file_count, 5);
        assert_eq!(status.current_file_index, 5);
        assert_eq!(status.percent_complete, 100);
        assert_eq!(status.stats.media_created, 3);
        assert_eq!(status.stats.media_updated, 0);
        assert_eq!(status.stats.media_unchanged, 1);
        assert_eq!(status.skipped_files.len(), 1);
        assert_eq!(status.skipped_files[0].reason, SkipReason::UnsupportedType);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 3);
        assert_eq!(env.media_names(), vec!["a.jpg", "b.png", "c.gif", "same.jpg"]);

        let stored = env.publisher.get_status(&env.gallery.id, &status.synch_id).unwrap();
        assert_eq!(stored.state, SyncState::Completed);
        assert_eq!(stored.current_file_index, 5);
        assert_eq!(stored.skipped_files, status.skipped_files);
        assert_eq!(stored.stats, status.stats);
        assert!(env.publisher.lock_owner(&env.gallery.id).unwrap().is_none());
    }

    #[test]
    fn test_abort_after_two_items() {
        let mut env = Env::new();
        for i in 1..=10 {
            env.write(&format!("img{i:02}.jpg"), format!("image {i}").as_bytes());
        }

        let pipeline = AbortingPipeline {
            publisher: env.publisher.clone(),
            gallery_id: env.gallery.id.clone(),
            abort_at: 2,
            calls: AtomicUsize::new(0),
        };
        let status = env.sync_with(&pipeline, 50);

        assert_eq!(status.state, SyncState::Cancelled);
        assert_eq!(status.total_file_count, 10);
        assert_eq!(status.current_file_index, 2);
        assert!(status.cancel_requested);
        assert_eq!(env.media_names(), vec!["img01.jpg", "img02.jpg"]);
        assert!(env.publisher.lock_owner(&env.gallery.id).unwrap().is_none());

        // Aborting a finished run changes nothing
        let again = env.publisher.abort(&env.gallery.id, &status.synch_id).unwrap();
        assert_eq!(again.state, SyncState::Cancelled);
    }

    #[test]
    fn test_lost_database_mid_run_keeps_committed_batches() {
        let mut env = Env::new();
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"] {
            env.write(name, name.as_bytes());
        }

        let mut session = env.begin(2).unwrap();
        let gallery_id = env.gallery.id.clone();
        let mut flaky = FlakyStore {
            inner: &mut env.storage,
            fail_on: 2,
            calls: 0,
        };
        // a.jpg fills the first batch on its own (media plus album cover)
        let status = session.run(&mut flaky, &FakePipeline::new());
        let calls = flaky.calls;

        assert_eq!(status.state, SyncState::Error);
        assert!(status.error_info.as_deref().unwrap().contains("disk I/O error"));
        assert_eq!(calls, 2);
        assert_eq!(status.stats.batches_committed, 1);
        assert_eq!(env.media_names(), vec!["a.jpg"]);
        assert!(env.publisher.lock_owner(&gallery_id).unwrap().is_none());
    }

    #[test]
    fn test_second_begin_fails_fast() {
        let env = Env::new();
        let first = env.begin(50).unwrap();

        match env.begin(50) {
            Err(Error::SynchronizationInProgress { synch_id, .. }) => {
                assert_eq!(synch_id, first.synch_id());
            }
            other => panic!("expected conflict, got {:?}", other.map(|s| s.status().clone())),
        }

        // Only the first run was recorded
        assert_eq!(env.publisher.list_runs(&env.gallery.id).unwrap().len(), 1);
        drop(first);
        assert!(env.begin(50).is_ok());
    }

    #[test]
    fn test_dropped_session_is_marked_failed() {
        let env = Env::new();
        let session = env.begin(50).unwrap();
        let synch_id = session.synch_id().to_string();
        drop(session);

        let status = env.publisher.get_status(&env.gallery.id, &synch_id).unwrap();
        assert_eq!(status.state, SyncState::Error);
        assert!(env.publisher.lock_owner(&env.gallery.id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_skipped_once_and_run_continues() {
        let mut env = Env::new();
        env.write("a.jpg", b"a");
        env.write("broken.jpg", b"??");
        env.write("c.jpg", b"c");

        let mut pipeline = FakePipeline::new();
        pipeline.corrupt.push("broken.jpg");
        let status = env.sync_with(&pipeline, 1);

        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.skipped_files.len(), 1);
        assert_eq!(status.skipped_files[0].file_name, "broken.jpg");
        assert_eq!(status.skipped_files[0].reason, SkipReason::CorruptFile);
        assert_eq!(env.media_names(), vec!["a.jpg", "c.jpg"]);
    }

    #[test]
    fn test_unwritable_destination_fails_run() {
        let mut env = Env::new();
        env.write("a.jpg", b"a");
        env.write("b.jpg", b"b");

        let mut pipeline = FakePipeline::new();
        pipeline.unwritable.push("b.jpg");
        let status = env.sync_with(&pipeline, 50);

        assert_eq!(status.state, SyncState::Error);
        assert!(status.error_info.unwrap().contains("not writable"));
        // a.jpg was staged in the same batch and rolled back with it
        assert!(env.media_names().is_empty());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let mut env = Env::new();
        env.write("a.jpg", b"a");
        env.write("trip/b.jpg", b"b");

        let first = env.sync_with(&FakePipeline::new(), 50);
        assert_eq!(first.stats.media_created, 2);
        assert_eq!(first.stats.albums_created, 1);

        let pipeline = FakePipeline::new();
        let second = env.sync_with(&pipeline, 50);
        assert_eq!(second.state, SyncState::Completed);
        assert_eq!(second.stats.media_created, 0);
        assert_eq!(second.stats.media_updated, 0);
        assert_eq!(second.stats.albums_created, 0);
        assert_eq!(second.stats.media_unchanged, 2);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rename_relocates_without_pipeline() {
        let mut env = Env::new();
        env.write("old.jpg", b"holiday");
        env.sync_with(&FakePipeline::new(), 50);
        let before = env.storage.list_media_objects(&env.root.id).unwrap();

        fs::rename(env.media.path().join("old.jpg"), env.media.path().join("new.jpg")).unwrap();
        let pipeline = FakePipeline::new();
        let status = env.sync_with(&pipeline, 50);

        assert_eq!(status.stats.media_relocated, 1);
        assert_eq!(status.stats.media_orphaned, 0);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);

        let after = env.storage.list_media_objects(&env.root.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].filename(), "new.jpg");
        // Renditions survive a rename
        assert_eq!(after[0].thumbnail, before[0].thumbnail);
    }

    #[test]
    fn test_duplicate_content_skipped() {
        let mut env = Env::new();
        env.write("a.jpg", b"same");
        env.write("b.jpg", b"same");

        let status = env.sync_with(&FakePipeline::new(), 50);
        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.skipped_files.len(), 1);
        assert_eq!(status.skipped_files[0].reason, SkipReason::DuplicateContent);
        assert_eq!(env.media_names(), vec!["a.jpg"]);
    }

    #[test]
    fn test_removed_files_orphaned_and_cover_set() {
        let mut env = Env::new();
        env.write("keep.jpg", b"k");
        env.write("gone.jpg", b"g");
        env.sync_with(&FakePipeline::new(), 50);

        let root = env.storage.get_album(&env.root.id).unwrap().unwrap();
        assert!(root.thumbnail_media_id.is_some());

        fs::remove_file(env.media.path().join("gone.jpg")).unwrap();
        let status = env.sync_with(&FakePipeline::new(), 50);
        assert_eq!(status.stats.media_orphaned, 1);
        assert_eq!(status.total_file_count, 1);
        assert_eq!(env.media_names(), vec!["keep.jpg"]);
    }

    #[test]
    fn test_empty_album_completes_at_full_percent() {
        let mut env = Env::new();
        let status = env.sync_with(&BasicPipeline, 50);
        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.total_file_count, 0);
        assert_eq!(status.percent_complete, 100);
    }

    #[test]
    fn test_missing_media_root_is_error() {
        let mut env = Env::new();
        env.gallery.media_root = env.media.path().join("unmounted").to_string_lossy().to_string();
        let status = env.sync_with(&BasicPipeline, 50);
        assert_eq!(status.state, SyncState::Error);
        assert!(env.publisher.lock_owner(&env.gallery.id).unwrap().is_none());
    }

    #[test]
    fn test_run_that_lost_its_lock_commits_nothing() {
        let mut env = Env::new();
        env.write("a.jpg", b"a");
        env.write("b.jpg", b"b");

        let pipeline = StealingPipeline {
            publisher: env.publisher.clone(),
            gallery_id: env.gallery.id.clone(),
            calls: AtomicUsize::new(0),
        };
        let status = env.sync_with(&pipeline, 1);

        assert_eq!(status.state, SyncState::Error);
        assert!(status.error_info.as_deref().unwrap().contains("lock"));
        assert_eq!(status.stats.batches_committed, 0);
        assert!(env.media_names().is_empty());
        assert_eq!(
            env.publisher.lock_owner(&env.gallery.id).unwrap().as_deref(),
            Some("intruder")
        );
    }

    #[test]
    fn test_case_only_album_rename_updates_stored_paths() {
        let mut env = Env::new();
        env.write("trip/a.jpg", b"a");
        env.write("trip/day1/b.jpg", b"b");
        env.sync_with(&FakePipeline::new(), 50);

        let trip = env.media.path().join("trip");
        let staging = env.media.path().join("trip.tmp");
        fs::rename(&trip, &staging).unwrap();
        fs::rename(&staging, env.media.path().join("TRIP")).unwrap();

        let pipeline = FakePipeline::new();
        let status = env.sync_with(&pipeline, 50);
        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.stats.albums_renamed, 1);
        assert_eq!(status.stats.albums_created, 0);
        assert_eq!(status.stats.albums_orphaned, 0);
        assert_eq!(status.stats.media_orphaned, 0);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);

        let albums = env.storage.list_albums(&env.gallery.id).unwrap();
        let renamed = albums.iter().find(|a| a.directory_name == "TRIP").unwrap();
        assert_eq!(renamed.rel_path, "TRIP");
        let day1 = albums.iter().find(|a| a.directory_name == "day1").unwrap();
        assert_eq!(day1.rel_path, "TRIP/day1");
        assert!(albums.iter().all(|a| !a.rel_path.starts_with("trip")));

        // A run scoped to the renamed album finds its directory
        let mut session = env.begin_at(renamed.clone(), 50).unwrap();
        let scoped = session.run(&mut env.storage, &pipeline);
        assert_eq!(scoped.state, SyncState::Completed);
        assert_eq!(scoped.stats.media_unchanged, 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_case_only_file_rename_updates_stored_filename() {
        let mut env = Env::new();
        env.write("IMG.jpg", b"pixels");
        env.sync_with(&FakePipeline::new(), 50);
        let before = env.storage.list_media_objects(&env.root.id).unwrap();

        fs::rename(env.media.path().join("IMG.jpg"), env.media.path().join("img.jpg")).unwrap();
        let pipeline = FakePipeline::new();
        let status = env.sync_with(&pipeline, 50);

        assert_eq!(status.state, SyncState::Completed);
        assert_eq!(status.stats.media_updated, 1);
        assert_eq!(status.stats.media_orphaned, 0);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
        let after = env.storage.list_media_objects(&env.root.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].filename(), "img.jpg");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped_not_orphaned() {
        use std::os::unix::fs::PermissionsExt;

        let mut env = Env::new();
        env.write("a.jpg", b"a");
        env.write("locked/x.jpg", b"x");
        env.write("zz.jpg", b"zz");
        env.sync_with(&FakePipeline::new(), 50);

        let locked = env.media.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Running as root: permissions are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        env.write("zz2.jpg", b"zz2");
        let status = env.sync_with(&FakePipeline::new(), 50);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(status.state, SyncState::Completed);
        let skip = status
            .skipped_files
            .iter()
            .find(|s| s.rel_path == "locked")
            .unwrap();
        assert_eq!(skip.reason, SkipReason::IoError);
        assert_eq!(status.stats.media_orphaned, 0);
        assert_eq!(status.stats.albums_orphaned, 0);
        assert_eq!(status.stats.media_created, 1);
        assert_eq!(env.media_names(), vec!["a.jpg", "zz.jpg", "zz2.jpg"]);

        let albums = env.storage.list_albums(&env.gallery.id).unwrap();
        let album = albums.iter().find(|a| a.rel_path == "locked").unwrap();
        assert!(!album.is_orphan);
        let inside = env.storage.list_media_objects(&album.id).unwrap();
        assert_eq!(inside.len(), 1);
        assert!(!inside[0].is_orphan);
    }
}
