//! Transaction coordinator.
//!
//! Staged graph writes are committed in bounded batches, each one atomic.
//! A failing commit rolls back only its own batch; earlier batches stay.

use crate::error::Result;
use crate::storage::{GallerySnapshot, GraphWrite, LockLease, SqliteStorage};
use tracing::{debug, warn};

/// The persistence the engine needs from the object graph.
pub trait GalleryStore {
    /// Read the persisted state of an album subtree.
    ///
    /// # Errors
    ///
    /// Returns an error if the album does not exist or the read fails.
    fn load_subtree(&self, album_id: &str, include_children: bool) -> Result<GallerySnapshot>;

    /// Apply writes as one transaction: all land or none do. With a lease,
    /// the transaction first confirms the lease still owns the gallery lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock changed hands or any write fails; nothing
    /// from the batch persists.
    fn apply_batch(
        &mut self,
        writes: &[GraphWrite],
        actor: &str,
        lease: Option<&LockLease>,
    ) -> Result<()>;
}

impl GalleryStore for SqliteStorage {
    fn load_subtree(&self, album_id: &str, include_children: bool) -> Result<GallerySnapshot> {
        SqliteStorage::load_subtree(self, album_id, include_children)
    }

    fn apply_batch(
        &mut self,
        writes: &[GraphWrite],
        actor: &str,
        lease: Option<&LockLease>,
    ) -> Result<()> {
        self.apply_writes_with_lease(writes, actor, lease)
    }
}

/// Groups graph writes into atomic batches.
pub struct TransactionCoordinator<'s, S: GalleryStore + ?Sized> {
    store: &'s mut S,
    actor: String,
    batch_size: usize,
    lease: Option<LockLease>,
    staged: Vec<GraphWrite>,
    batches_committed: usize,
    writes_committed: usize,
}

impl<'s, S: GalleryStore + ?Sized> TransactionCoordinator<'s, S> {
    pub fn new(store: &'s mut S, actor: &str, batch_size: usize) -> Self {
        Self {
            store,
            actor: actor.to_string(),
            batch_size: batch_size.max(1),
            lease: None,
            staged: Vec::new(),
            batches_committed: 0,
            writes_committed: 0,
        }
    }

    /// Require every commit to still own the gallery lock.
    #[must_use]
    pub fn with_lease(mut self, lease: LockLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Stage the writes of one item, committing once the batch is full.
    ///
    /// An item's writes always land in the same batch.
    ///
    /// # Errors
    ///
    /// Returns the commit error; the failed batch is discarded.
    pub fn stage_all(&mut self, writes: Vec<GraphWrite>) -> Result<()> {
        self.staged.extend(writes);
        if self.staged.len() >= self.batch_size {
            self.commit()?;
        }
        Ok(())
    }

    /// Commit whatever is staged.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the staged writes are discarded.
    pub fn commit(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let writes = std::mem::take(&mut self.staged);
        match self.store.apply_batch(&writes, &self.actor, self.lease.as_ref()) {
            Ok(()) => {
                self.batches_committed += 1;
                self.writes_committed += writes.len();
                debug!(
                    batch = self.batches_committed,
                    writes = writes.len(),
                    "Committed sync batch"
                );
                Ok(())
            }
            Err(err) => {
                warn!(writes = writes.len(), error = %err, "Sync batch rolled back");
                Err(err)
            }
        }
    }

    /// Discard staged writes without committing. Returns how many were dropped.
    pub fn rollback(&mut self) -> usize {
        let dropped = self.staged.len();
        self.staged.clear();
        if dropped > 0 {
            debug!(dropped, "Discarded staged writes");
        }
        dropped
    }

    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    #[must_use]
    pub fn writes_committed(&self) -> usize {
        self.writes_committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{AlbumNode, Gallery};

    /// Records batches; fails the Nth commit.
    struct RecordingStore {
        fail_on: Option<usize>,
        calls: usize,
        applied: Vec<Vec<String>>,
    }

    impl GalleryStore for RecordingStore {
        fn load_subtree(&self, _: &str, _: bool) -> Result<GallerySnapshot> {
            Ok(GallerySnapshot::default())
        }

        fn apply_batch(&mut self, writes: &[GraphWrite], _: &str, _: Option<&LockLease>) -> Result<()> {
            self.calls += 1;
            if self.fail_on == Some(self.calls) {
                return Err(Error::Other("disk I/O error".into()));
            }
            self.applied
                .push(writes.iter().map(|w| w.label().to_string()).collect());
            Ok(())
        }
    }

    fn restore(id: &str) -> GraphWrite {
        GraphWrite::RestoreAlbum { album_id: id.into() }
    }

    #[test]
    fn test_commits_when_batch_full() {
        let mut store = RecordingStore { fail_on: None, calls: 0, applied: Vec::new() };
        let mut coordinator = TransactionCoordinator::new(&mut store, "t", 2);

        coordinator.stage_all(vec![restore("a")]).unwrap();
        assert_eq!(coordinator.staged_len(), 1);
        coordinator.stage_all(vec![restore("b")]).unwrap();
        assert_eq!(coordinator.staged_len(), 0);
        coordinator.stage_all(vec![restore("c")]).unwrap();
        coordinator.commit().unwrap();

        assert_eq!(coordinator.batches_committed(), 2);
        assert_eq!(coordinator.writes_committed(), 3);
        assert_eq!(store.applied.len(), 2);
    }

    #[test]
    fn test_item_writes_never_split() {
        let mut store = RecordingStore { fail_on: None, calls: 0, applied: Vec::new() };
        let mut coordinator = TransactionCoordinator::new(&mut store, "t", 2);

        coordinator.stage_all(vec![restore("a")]).unwrap();
        coordinator
            .stage_all(vec![restore("b"), restore("c")])
            .unwrap();
        assert_eq!(store.applied, vec![vec!["restore_album"; 3]]);
    }

    #[test]
    fn test_failed_commit_discards_batch() {
        let mut store = RecordingStore { fail_on: Some(2), calls: 0, applied: Vec::new() };
        let mut coordinator = TransactionCoordinator::new(&mut store, "t", 1);

        coordinator.stage_all(vec![restore("a")]).unwrap();
        assert!(coordinator.stage_all(vec![restore("b")]).is_err());
        assert_eq!(coordinator.staged_len(), 0);
        assert_eq!(coordinator.batches_committed(), 1);
        assert_eq!(store.applied.len(), 1);
    }

    #[test]
    fn test_sqlite_batch_is_atomic() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let gallery = Gallery::new("G".into(), "/tmp".into());
        let root = storage.create_gallery(&gallery, "t").unwrap();
        let ok = AlbumNode::new(&gallery.id, Some(&root.id), "ok", "ok", 1, "t");
        let orphan_parent = AlbumNode::new(&gallery.id, Some("alb_missing"), "bad", "x/bad", 1, "t");

        let mut coordinator = TransactionCoordinator::new(&mut storage, "t", 10);
        coordinator
            .stage_all(vec![
                GraphWrite::InsertAlbum(ok.clone()),
                GraphWrite::InsertAlbum(orphan_parent),
            ])
            .unwrap();
        assert!(coordinator.commit().is_err());
        assert_eq!(coordinator.rollback(), 0);

        assert!(storage.get_album(&ok.id).unwrap().is_none());
    }
}
