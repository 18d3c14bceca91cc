//! Gallery object reconciler.
//!
//! Diffs one walk of an album directory against the persisted subtree and
//! produces the ordered list of actions that brings the graph in line with
//! the disk. Nothing here writes to the database; the session executes the
//! plan.
//!
//! # Matching
//!
//! 1. Directories match child albums of the same parent by name; files match
//!    media objects of the same album by original filename.
//! 2. An exact name always beats a case-insensitive one. Among entries that
//!    differ only by case, the first in walk order claims the record and the
//!    rest become creates carrying a `name_collision` warning.
//! 3. With rename detection on, files left unmatched after the whole walk
//!    fall back to content hash against records nobody claimed. A file is
//!    only hashed when an unclaimed record of the same size exists.
//!
//! Records nobody claimed become orphans, media first, then albums deepest
//! first. Anything below a path the walker could not read is left alone.

use crate::model::{AlbumNode, GallerySettings, MediaKind, MediaObjectRecord, OrphanPolicy};
use crate::storage::GallerySnapshot;
use crate::sync::hash::{file_hash, has_changed};
use crate::sync::types::{SkipEntry, SkipReason, SyncOptions};
use crate::sync::walker::{EntryKind, WalkEntry, WalkItem};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// How an existing media object changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Content changed: run the pipeline again.
    Reprocess,
    /// Content unchanged but the caller asked for fresh renditions.
    Regenerate,
    /// Same content, new size/mtime facts only.
    Touch,
    /// Same content found under another name or album.
    Relocate,
    /// Orphaned record whose file is back.
    Restore,
}

impl UpdateKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reprocess => "reprocess",
            Self::Regenerate => "regenerate",
            Self::Touch => "touch",
            Self::Relocate => "relocate",
            Self::Restore => "restore",
        }
    }

    /// Whether the media pipeline has to run for this change.
    #[must_use]
    pub const fn needs_pipeline(&self) -> bool {
        matches!(self, Self::Reprocess | Self::Regenerate)
    }
}

/// One step of a reconcile plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateAlbum {
        album: AlbumNode,
        warning: Option<SkipEntry>,
    },
    RestoreAlbum {
        album_id: String,
        rel_path: String,
    },
    /// Matched only case-insensitively: the directory's name on disk wins.
    RenameAlbum {
        album_id: String,
        from: String,
        directory_name: String,
        rel_path: String,
    },
    CreateMediaObject {
        entry: WalkEntry,
        album_id: String,
        kind: MediaKind,
        seq: i64,
        warning: Option<SkipEntry>,
    },
    UpdateMediaObject {
        record: MediaObjectRecord,
        entry: WalkEntry,
        /// Album the file lives in now (differs from the record's on a move)
        album_id: String,
        kind: MediaKind,
        seq: i64,
        change: UpdateKind,
        /// Content hash, when the reconciler already computed it
        hash: Option<String>,
    },
    Unchanged {
        media_id: String,
        entry: WalkEntry,
    },
    Skip(SkipEntry),
    MarkOrphanAlbum {
        album_id: String,
        rel_path: String,
    },
    MarkOrphanMediaObject {
        media_id: String,
        rel_path: String,
    },
}

impl Action {
    /// File-level actions count toward totalFileCount; structural ones don't.
    #[must_use]
    pub const fn is_file_item(&self) -> bool {
        matches!(
            self,
            Self::CreateMediaObject { .. }
                | Self::UpdateMediaObject { .. }
                | Self::Unchanged { .. }
                | Self::Skip(_)
        )
    }

    /// Name reported as currentFileName while this action runs.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::CreateMediaObject { entry, .. }
            | Self::UpdateMediaObject { entry, .. }
            | Self::Unchanged { entry, .. } => &entry.name,
            Self::Skip(skip) => &skip.file_name,
            Self::CreateAlbum { album, .. } => &album.rel_path,
            Self::RestoreAlbum { rel_path, .. }
            | Self::RenameAlbum { rel_path, .. }
            | Self::MarkOrphanAlbum { rel_path, .. }
            | Self::MarkOrphanMediaObject { rel_path, .. } => rel_path,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CreateAlbum { .. } => "create_album",
            Self::RestoreAlbum { .. } => "restore_album",
            Self::RenameAlbum { .. } => "rename_album",
            Self::CreateMediaObject { .. } => "create_media",
            Self::UpdateMediaObject { .. } => "update_media",
            Self::Unchanged { .. } => "unchanged",
            Self::Skip(_) => "skip",
            Self::MarkOrphanAlbum { .. } => "orphan_album",
            Self::MarkOrphanMediaObject { .. } => "orphan_media",
        }
    }
}

/// Output of one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub actions: Vec<Action>,
    /// Number of file-level actions
    pub total_file_count: usize,
    /// Files hashed while planning
    pub files_hashed: usize,
}

impl ReconcilePlan {
    /// Count actions with the given label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.actions.iter().filter(|a| a.label() == label).count()
    }
}

/// Computes a plan for one album subtree.
pub struct Reconciler<'a> {
    media_root: &'a Path,
    settings: &'a GallerySettings,
    start: &'a AlbumNode,
    snapshot: &'a GallerySnapshot,
    options: SyncOptions,
    actor: &'a str,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        media_root: &'a Path,
        settings: &'a GallerySettings,
        start: &'a AlbumNode,
        snapshot: &'a GallerySnapshot,
        options: SyncOptions,
        actor: &'a str,
    ) -> Self {
        Self {
            media_root,
            settings,
            start,
            snapshot,
            options,
            actor,
        }
    }

    /// Diff the walked entries against the snapshot.
    #[must_use]
    pub fn reconcile(&self, items: &[WalkItem]) -> ReconcilePlan {
        let mut planner = Planner::new(self, items);

        for item in items {
            match item {
                WalkItem::Skipped(skip) => {
                    planner.skipped_paths.push(skip.rel_path.clone());
                    planner.slots.push(Some(Action::Skip(skip.clone())));
                }
                WalkItem::Entry(entry) if entry.kind == EntryKind::Directory => {
                    planner.plan_directory(entry);
                }
                WalkItem::Entry(entry) => planner.plan_file(entry),
            }
        }

        planner.resolve_unmatched();
        planner.plan_orphans();
        planner.finish()
    }
}

enum NameMatch<'r, T> {
    Found(&'r T),
    Collision,
    NoMatch,
}

/// Match `name` against candidate records.
///
/// Case-insensitive candidates whose exact name is also on disk are left
/// for that entry to claim.
fn match_name<'r, T>(
    candidates: &[&'r T],
    name: &str,
    name_of: impl Fn(&T) -> &str,
    is_claimed: impl Fn(&T) -> bool,
    on_disk: Option<&HashSet<String>>,
) -> NameMatch<'r, T> {
    if let Some(&exact) = candidates
        .iter()
        .find(|&&c| name_of(c) == name && !is_claimed(c))
    {
        return NameMatch::Found(exact);
    }

    let folded = name.to_lowercase();
    let mut collided = false;
    for &c in candidates {
        if name_of(c).to_lowercase() != folded {
            continue;
        }
        let reserved = on_disk.is_some_and(|names| names.contains(name_of(c)));
        if !is_claimed(c) && !reserved {
            return NameMatch::Found(c);
        }
        collided = true;
    }

    if collided {
        NameMatch::Collision
    } else {
        NameMatch::NoMatch
    }
}

struct Unmatched {
    slot: usize,
    entry: WalkEntry,
    album_id: String,
    kind: MediaKind,
    collision: bool,
}

struct Planner<'p, 'a> {
    ctx: &'p Reconciler<'a>,
    albums_by_id: HashMap<&'a str, &'a AlbumNode>,
    children: HashMap<&'a str, Vec<&'a AlbumNode>>,
    media_by_album: HashMap<&'a str, Vec<&'a MediaObjectRecord>>,
    /// Exact names on disk, keyed by (parent rel path, kind)
    disk_names: HashMap<(String, EntryKind), HashSet<String>>,
    /// Disk rel path → album id (existing or planned)
    album_ids: HashMap<String, String>,
    claimed_albums: HashSet<String>,
    claimed_media: HashSet<String>,
    next_album_seq: HashMap<String, i64>,
    next_media_seq: HashMap<String, i64>,
    skipped_paths: Vec<String>,
    slots: Vec<Option<Action>>,
    unmatched: Vec<Unmatched>,
    files_hashed: usize,
}

impl<'p, 'a> Planner<'p, 'a> {
    fn new(ctx: &'p Reconciler<'a>, items: &[WalkItem]) -> Self {
        let snapshot = ctx.snapshot;

        let mut albums_by_id = HashMap::new();
        let mut children: HashMap<&str, Vec<&AlbumNode>> = HashMap::new();
        for album in &snapshot.albums {
            albums_by_id.insert(album.id.as_str(), album);
            if let Some(parent) = album.parent_id.as_deref() {
                children.entry(parent).or_default().push(album);
            }
        }

        let mut media_by_album: HashMap<&str, Vec<&MediaObjectRecord>> = HashMap::new();
        for media in &snapshot.media {
            media_by_album.entry(media.album_id.as_str()).or_default().push(media);
        }

        let mut disk_names: HashMap<(String, EntryKind), HashSet<String>> = HashMap::new();
        for item in items {
            if let WalkItem::Entry(entry) = item {
                disk_names
                    .entry((entry.parent_rel_path().to_string(), entry.kind))
                    .or_default()
                    .insert(entry.name.clone());
            }
        }

        let mut album_ids = HashMap::new();
        album_ids.insert(ctx.start.rel_path.clone(), ctx.start.id.clone());

        Self {
            ctx,
            albums_by_id,
            children,
            media_by_album,
            disk_names,
            album_ids,
            claimed_albums: HashSet::new(),
            claimed_media: HashSet::new(),
            next_album_seq: HashMap::new(),
            next_media_seq: HashMap::new(),
            skipped_paths: Vec::new(),
            slots: Vec::new(),
            unmatched: Vec::new(),
            files_hashed: 0,
        }
    }

    fn parent_album(&mut self, entry: &WalkEntry) -> Option<String> {
        let found = self.album_ids.get(entry.parent_rel_path()).cloned();
        if found.is_none() {
            self.slots.push(Some(Action::Skip(SkipEntry::new(
                &entry.rel_path,
                SkipReason::IoError,
                "Containing directory could not be reconciled",
            ))));
        }
        found
    }

    fn plan_directory(&mut self, entry: &WalkEntry) {
        let Some(parent_id) = self.parent_album(entry) else {
            return;
        };

        let siblings = self.children.get(parent_id.as_str()).cloned().unwrap_or_default();
        let on_disk = self
            .disk_names
            .get(&(entry.parent_rel_path().to_string(), EntryKind::Directory));
        let claimed = &self.claimed_albums;
        let found = match_name(
            &siblings,
            &entry.name,
            |a| a.directory_name.as_str(),
            |a| claimed.contains(&a.id),
            on_disk,
        );

        match found {
            NameMatch::Found(album) => {
                self.claimed_albums.insert(album.id.clone());
                self.album_ids.insert(entry.rel_path.clone(), album.id.clone());
                if album.is_orphan {
                    self.slots.push(Some(Action::RestoreAlbum {
                        album_id: album.id.clone(),
                        rel_path: entry.rel_path.clone(),
                    }));
                }
                if album.directory_name != entry.name {
                    self.slots.push(Some(Action::RenameAlbum {
                        album_id: album.id.clone(),
                        from: album.rel_path.clone(),
                        directory_name: entry.name.clone(),
                        rel_path: entry.rel_path.clone(),
                    }));
                }
            }
            NameMatch::Collision | NameMatch::NoMatch => {
                let warning = matches!(found, NameMatch::Collision).then(|| {
                    SkipEntry::new(
                        &entry.rel_path,
                        SkipReason::NameCollision,
                        "Directory name differs only by case from an album already matched; created as a new album",
                    )
                });
                let seq = self.album_seq(&parent_id, &siblings);
                let album = AlbumNode::new(
                    &self.ctx.start.gallery_id,
                    Some(&parent_id),
                    &entry.name,
                    &entry.rel_path,
                    seq,
                    self.ctx.actor,
                );
                self.album_ids.insert(entry.rel_path.clone(), album.id.clone());
                self.slots.push(Some(Action::CreateAlbum { album, warning }));
            }
        }
    }

    fn plan_file(&mut self, entry: &WalkEntry) {
        let Some(album_id) = self.parent_album(entry) else {
            return;
        };

        let candidates = self
            .media_by_album
            .get(album_id.as_str())
            .cloned()
            .unwrap_or_default();
        let on_disk = self
            .disk_names
            .get(&(entry.parent_rel_path().to_string(), EntryKind::File));
        let claimed = &self.claimed_media;
        let found = match_name(
            &candidates,
            &entry.name,
            MediaObjectRecord::filename,
            |m| claimed.contains(&m.id),
            on_disk,
        );

        if let NameMatch::Found(record) = found {
            self.claimed_media.insert(record.id.clone());
        }

        let Some(kind) = self.ctx.settings.classify(&entry.name) else {
            let ext = Path::new(&entry.name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_else(|| "(none)".to_string());
            self.slots.push(Some(Action::Skip(SkipEntry::new(
                &entry.rel_path,
                SkipReason::UnsupportedType,
                format!("Unsupported file type {ext}"),
            ))));
            return;
        };

        match found {
            NameMatch::Found(record) => {
                let action = self.compare(record, entry, &album_id, kind);
                self.slots.push(Some(action));
            }
            NameMatch::Collision | NameMatch::NoMatch => {
                self.unmatched.push(Unmatched {
                    slot: self.slots.len(),
                    entry: entry.clone(),
                    album_id,
                    kind,
                    collision: matches!(found, NameMatch::Collision),
                });
                self.slots.push(None);
            }
        }
    }

    /// Decide how a name-matched record changes.
    fn compare(
        &mut self,
        record: &MediaObjectRecord,
        entry: &WalkEntry,
        album_id: &str,
        kind: MediaKind,
    ) -> Action {
        let regenerate = self.ctx.options.regenerates_anything();
        let same_facts = record.original.size == entry.size && record.file_mtime == entry.mtime;
        let renamed = record.filename() != entry.name;

        let (change, hash) = if same_facts {
            if record.is_orphan {
                (UpdateKind::Restore, None)
            } else if regenerate {
                (UpdateKind::Regenerate, None)
            } else if renamed {
                (UpdateKind::Touch, None)
            } else {
                return Action::Unchanged {
                    media_id: record.id.clone(),
                    entry: entry.clone(),
                };
            }
        } else {
            let hash = match self.hash(entry) {
                Ok(hash) => hash,
                Err(skip) => return Action::Skip(skip),
            };
            let change = if has_changed(&hash, &record.hash_key) {
                UpdateKind::Reprocess
            } else if regenerate {
                UpdateKind::Regenerate
            } else if record.is_orphan {
                UpdateKind::Restore
            } else {
                UpdateKind::Touch
            };
            (change, Some(hash))
        };

        Action::UpdateMediaObject {
            record: record.clone(),
            entry: entry.clone(),
            album_id: album_id.to_string(),
            kind,
            seq: record.seq,
            change,
            hash,
        }
    }

    fn hash(&mut self, entry: &WalkEntry) -> Result<String, SkipEntry> {
        self.files_hashed += 1;
        file_hash(&self.ctx.media_root.join(&entry.rel_path)).map_err(|err| {
            SkipEntry::new(&entry.rel_path, SkipReason::IoError, format!("Failed to read file: {err}"))
        })
    }

    /// Second pass: rename detection, then creates for whatever is left.
    fn resolve_unmatched(&mut self) {
        let snapshot = self.ctx.snapshot;
        let mut by_size: HashMap<u64, Vec<&'a MediaObjectRecord>> = HashMap::new();
        if self.ctx.settings.detect_renamed {
            for media in &snapshot.media {
                if !self.claimed_media.contains(&media.id) {
                    by_size.entry(media.original.size).or_default().push(media);
                }
            }
        }

        let unmatched = std::mem::take(&mut self.unmatched);
        for file in unmatched {
            if !file.collision {
                let has_candidate = by_size.get(&file.entry.size).is_some_and(|list| {
                    list.iter().any(|m| !self.claimed_media.contains(&m.id))
                });

                if has_candidate {
                    let hash = match self.hash(&file.entry) {
                        Ok(hash) => hash,
                        Err(skip) => {
                            self.slots[file.slot] = Some(Action::Skip(skip));
                            continue;
                        }
                    };

                    if let Some(record) = self.relocation_source(&by_size, &file, &hash) {
                        debug!(from = %record.filename(), to = %file.entry.rel_path, "Detected relocated file");
                        self.claimed_media.insert(record.id.clone());
                        let seq = if record.album_id == file.album_id {
                            record.seq
                        } else {
                            self.media_seq(&file.album_id)
                        };
                        self.slots[file.slot] = Some(Action::UpdateMediaObject {
                            record: record.clone(),
                            entry: file.entry,
                            album_id: file.album_id,
                            kind: file.kind,
                            seq,
                            change: UpdateKind::Relocate,
                            hash: Some(hash),
                        });
                        continue;
                    }
                }
            }

            let warning = file.collision.then(|| {
                SkipEntry::new(
                    &file.entry.rel_path,
                    SkipReason::NameCollision,
                    "File name differs only by case from a file already matched; created as a new media object",
                )
            });
            let seq = self.media_seq(&file.album_id);
            self.slots[file.slot] = Some(Action::CreateMediaObject {
                entry: file.entry,
                album_id: file.album_id,
                kind: file.kind,
                seq,
                warning,
            });
        }
    }

    /// Unclaimed record with the same size and hash, same album preferred.
    fn relocation_source(
        &self,
        by_size: &HashMap<u64, Vec<&'a MediaObjectRecord>>,
        file: &Unmatched,
        hash: &str,
    ) -> Option<&'a MediaObjectRecord> {
        let candidates: Vec<&'a MediaObjectRecord> = by_size
            .get(&file.entry.size)?
            .iter()
            .copied()
            .filter(|m| m.hash_key == hash && !self.claimed_media.contains(&m.id))
            .collect();

        candidates
            .iter()
            .find(|m| m.album_id == file.album_id)
            .or_else(|| candidates.first())
            .copied()
    }

    fn album_seq(&mut self, parent_id: &str, siblings: &[&AlbumNode]) -> i64 {
        let next = self
            .next_album_seq
            .entry(parent_id.to_string())
            .or_insert_with(|| siblings.iter().map(|a| a.seq).max().unwrap_or(0));
        *next += 1;
        *next
    }

    fn media_seq(&mut self, album_id: &str) -> i64 {
        let existing = self
            .media_by_album
            .get(album_id)
            .map(|list| list.iter().map(|m| m.seq).max().unwrap_or(0))
            .unwrap_or(0);
        let next = self
            .next_media_seq
            .entry(album_id.to_string())
            .or_insert(existing);
        *next += 1;
        *next
    }

    /// True if `rel_path` is at or below a path the walker failed on.
    fn is_protected(&self, rel_path: &str) -> bool {
        self.skipped_paths.iter().any(|skipped| {
            skipped.is_empty()
                || rel_path == skipped
                || rel_path
                    .strip_prefix(skipped.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn plan_orphans(&mut self) {
        let delete = self.ctx.settings.orphan_policy == OrphanPolicy::Delete;
        let snapshot = self.ctx.snapshot;

        for media in &snapshot.media {
            if self.claimed_media.contains(&media.id) || (media.is_orphan && !delete) {
                continue;
            }
            let album_path = self
                .albums_by_id
                .get(media.album_id.as_str())
                .map_or("", |a| a.rel_path.as_str());
            let rel_path = if album_path.is_empty() {
                media.filename().to_string()
            } else {
                format!("{album_path}/{}", media.filename())
            };
            if self.is_protected(&rel_path) {
                continue;
            }
            self.slots.push(Some(Action::MarkOrphanMediaObject {
                media_id: media.id.clone(),
                rel_path,
            }));
        }

        let mut albums: Vec<&AlbumNode> = snapshot
            .albums
            .iter()
            .filter(|a| a.id != self.ctx.start.id && !self.claimed_albums.contains(&a.id))
            .filter(|a| delete || !a.is_orphan)
            .filter(|a| !self.is_protected(&a.rel_path))
            .collect();
        albums.sort_by(|a, b| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| a.rel_path.cmp(&b.rel_path))
        });

        for album in albums {
            self.slots.push(Some(Action::MarkOrphanAlbum {
                album_id: album.id.clone(),
                rel_path: album.rel_path.clone(),
            }));
        }
    }

    fn finish(self) -> ReconcilePlan {
        let actions: Vec<Action> = self.slots.into_iter().flatten().collect();
        let total_file_count = actions.iter().filter(|a| a.is_file_item()).count();
        ReconcilePlan {
            actions,
            total_file_count,
            files_hashed: self.files_hashed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rendition;
    use crate::sync::hash::bytes_hash;
    use crate::sync::walker::DirectoryWalker;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        settings: GallerySettings,
        root: AlbumNode,
        snapshot: GallerySnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            let root = AlbumNode::root("gal_test", "t");
            Self {
                temp: TempDir::new().unwrap(),
                settings: GallerySettings::default(),
                snapshot: GallerySnapshot {
                    albums: vec![root.clone()],
                    media: Vec::new(),
                },
                root,
            }
        }

        fn write(&self, rel: &str, data: &[u8]) -> WalkEntry {
            let path = self.temp.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, data).unwrap();
            self.entry(rel)
        }

        fn entry(&self, rel: &str) -> WalkEntry {
            let walker = DirectoryWalker::new(self.temp.path(), "", true, true).unwrap();
            walker
                .walk()
                .find_map(|item| match item {
                    WalkItem::Entry(e) if e.rel_path == rel => Some(e),
                    _ => None,
                })
                .unwrap()
        }

        fn album(&mut self, parent: &AlbumNode, name: &str) -> AlbumNode {
            let rel = if parent.rel_path.is_empty() {
                name.to_string()
            } else {
                format!("{}/{name}", parent.rel_path)
            };
            let seq = i64::try_from(self.snapshot.albums.len()).unwrap();
            let album = AlbumNode::new("gal_test", Some(&parent.id), name, &rel, seq, "t");
            self.snapshot.albums.push(album.clone());
            album
        }

        /// Persist a record mirroring a file as it is on disk now.
        fn record(&mut self, album: &AlbumNode, entry: &WalkEntry, data: &[u8]) -> MediaObjectRecord {
            let record = MediaObjectRecord {
                id: MediaObjectRecord::new_id(),
                gallery_id: "gal_test".into(),
                album_id: album.id.clone(),
                kind: MediaKind::Image,
                original: Rendition {
                    filename: entry.name.clone(),
                    size: entry.size,
                    ..Rendition::default()
                },
                optimized: None,
                thumbnail: None,
                hash_key: bytes_hash(data),
                file_mtime: entry.mtime,
                seq: i64::try_from(self.snapshot.media.len()).unwrap() + 1,
                is_orphan: false,
                created_at: 0,
                created_by: "t".into(),
                updated_at: 0,
                modified_by: "t".into(),
            };
            self.snapshot.media.push(record.clone());
            record
        }

        fn plan(&self, options: SyncOptions) -> ReconcilePlan {
            let walker = DirectoryWalker::new(
                self.temp.path(),
                "",
                options.include_child_albums,
                self.settings.skip_hidden,
            )
            .unwrap();
            let items: Vec<WalkItem> = walker.walk().collect();
            Reconciler::new(
                self.temp.path(),
                &self.settings,
                &self.root,
                &self.snapshot,
                options,
                "t",
            )
            .reconcile(&items)
        }
    }

    #[test]
    fn test_new_identical_and_unsupported() {
        let mut fx = Fixture::new();
        fx.write("a.jpg", b"aaa");
        fx.write("b.jpg", b"bbbb");
        fx.write("c.png", b"ccccc");
        let same = fx.write("d.jpg", b"dd");
        let root = fx.root.clone();
        fx.record(&root, &same, b"dd");
        fx.write("tool.exe", b"MZ");

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.total_file_count, 5);
        assert_eq!(plan.count("create_media"), 3);
        assert_eq!(plan.count("unchanged"), 1);
        assert_eq!(plan.count("update_media"), 0);
        assert_eq!(plan.count("skip"), 1);
        assert_eq!(plan.files_hashed, 0);

        let Some(Action::Skip(skip)) = plan.actions.last() else {
            panic!("expected the exe skip last");
        };
        assert_eq!(skip.reason, SkipReason::UnsupportedType);
        assert_eq!(skip.file_name, "tool.exe");
    }

    #[test]
    fn test_unsupported_allowed_as_generic() {
        let mut fx = Fixture::new();
        fx.write("tool.exe", b"MZ");
        fx.settings.allow_unknown_types = true;

        let plan = fx.plan(SyncOptions::default());
        assert!(matches!(
            plan.actions[0],
            Action::CreateMediaObject { kind: MediaKind::Generic, .. }
        ));
    }

    #[test]
    fn test_changed_facts_hash_decides() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();

        let touched = fx.write("same.jpg", b"content");
        let mut record = fx.record(&root, &touched, b"content");
        record.file_mtime -= 10_000;
        fx.snapshot.media[0] = record;

        let edited = fx.write("edited.jpg", b"new content");
        fx.record(&root, &edited, b"old content");
        fx.snapshot.media[1].file_mtime -= 10_000;

        let plan = fx.plan(SyncOptions::default());
        let changes: Vec<_> = plan
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::UpdateMediaObject { entry, change, hash, .. } => {
                    Some((entry.name.as_str(), *change, hash.is_some()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                ("edited.jpg", UpdateKind::Reprocess, true),
                ("same.jpg", UpdateKind::Touch, true),
            ]
        );
    }

    #[test]
    fn test_regenerate_option_forces_pipeline() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let entry = fx.write("a.jpg", b"aaa");
        fx.record(&root, &entry, b"aaa");

        let options = SyncOptions {
            regenerate_thumbnails: true,
            ..SyncOptions::default()
        };
        let plan = fx.plan(options);
        assert!(matches!(
            plan.actions[0],
            Action::UpdateMediaObject { change: UpdateKind::Regenerate, .. }
        ));
    }

    #[test]
    fn test_rename_detected_by_hash() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let old = fx.write("old_name.jpg", b"same bytes");
        let record = fx.record(&root, &old, b"same bytes");
        fs::rename(fx.temp.path().join("old_name.jpg"), fx.temp.path().join("new_name.jpg"))
            .unwrap();
        fx.write("unrelated.jpg", b"x");

        let plan = fx.plan(SyncOptions::default());
        // Only the same-sized file gets hashed
        assert_eq!(plan.files_hashed, 1);
        assert_eq!(plan.count("orphan_media"), 0);
        assert_eq!(plan.count("create_media"), 1);

        let relocated = plan
            .actions
            .iter()
            .find_map(|a| match a {
                Action::UpdateMediaObject { record: r, entry, change: UpdateKind::Relocate, seq, .. } => {
                    Some((r.id.clone(), entry.name.clone(), *seq))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(relocated, (record.id, "new_name.jpg".to_string(), record.seq));
    }

    #[test]
    fn test_rename_detection_disabled_orphans_and_creates() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let old = fx.write("old.jpg", b"bytes");
        fx.record(&root, &old, b"bytes");
        fs::rename(fx.temp.path().join("old.jpg"), fx.temp.path().join("new.jpg")).unwrap();
        fx.settings.detect_renamed = false;

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.files_hashed, 0);
        assert_eq!(plan.count("create_media"), 1);
        assert_eq!(plan.count("orphan_media"), 1);
        assert_eq!(plan.total_file_count, 1);
    }

    #[test]
    fn test_name_match_never_stolen_by_hash() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        // copy.jpg sorts first and has the same bytes as orig.jpg
        fx.write("copy.jpg", b"dup");
        let orig = fx.write("orig.jpg", b"dup");
        fx.record(&root, &orig, b"dup");

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.count("unchanged"), 1);
        assert_eq!(plan.count("create_media"), 1);
        assert!(matches!(
            &plan.actions[0],
            Action::CreateMediaObject { entry, .. } if entry.name == "copy.jpg"
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_case_collision_first_claims_rest_warned() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let first = fx.write("IMG.JPG", b"one");
        fx.write("Img.jpg", b"two");
        let mut record = fx.record(&root, &first, b"one");
        record.original.filename = "img.jpg".into();
        fx.snapshot.media[0] = record.clone();

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.total_file_count, 2);
        match &plan.actions[0] {
            Action::UpdateMediaObject { record: r, entry, change, .. } => {
                assert_eq!(r.id, record.id);
                assert_eq!(entry.name, "IMG.JPG");
                assert_eq!(*change, UpdateKind::Touch);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &plan.actions[1] {
            Action::CreateMediaObject { warning: Some(w), .. } => {
                assert_eq!(w.reason, SkipReason::NameCollision);
                assert_eq!(w.file_name, "Img.jpg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_case_only_file_rename_takes_disk_name() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let entry = fx.write("img.jpg", b"pixels");
        let mut record = fx.record(&root, &entry, b"pixels");
        record.original.filename = "IMG.jpg".into();
        fx.snapshot.media[0] = record.clone();

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.count("orphan_media"), 0);
        assert_eq!(plan.count("create_media"), 0);
        match &plan.actions[..] {
            [Action::UpdateMediaObject { record: r, entry, change, hash, .. }] => {
                assert_eq!(r.id, record.id);
                assert_eq!(entry.name, "img.jpg");
                assert_eq!(*change, UpdateKind::Touch);
                assert!(hash.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(plan.files_hashed, 0);
    }

    #[test]
    fn test_case_only_directory_rename_renames_album() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let trip = fx.album(&root, "trip");
        let day = fx.album(&trip, "day1");
        let entry = fx.write("TRIP/day1/a.jpg", b"a");
        fx.record(&day, &entry, b"a");

        let plan = fx.plan(SyncOptions::default());
        let labels: Vec<_> = plan.actions.iter().map(Action::label).collect();
        assert_eq!(labels, vec!["rename_album", "unchanged"]);
        match &plan.actions[0] {
            Action::RenameAlbum { album_id, from, directory_name, rel_path } => {
                assert_eq!(album_id, &trip.id);
                assert_eq!(from, "trip");
                assert_eq!(directory_name, "TRIP");
                assert_eq!(rel_path, "TRIP");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!plan.actions[0].is_file_item());
        assert_eq!(plan.total_file_count, 1);
    }

    #[test]
    fn test_albums_created_in_walk_order_with_sequences() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let existing = fx.album(&root, "2023");
        fx.snapshot.albums[1].seq = 4;
        fx.write("2023/a.jpg", b"a");
        fx.write("2024/trip/b.jpg", b"b");

        let plan = fx.plan(SyncOptions::default());
        let labels: Vec<_> = plan.actions.iter().map(Action::label).collect();
        assert_eq!(
            labels,
            vec!["create_media", "create_album", "create_album", "create_media"]
        );

        let Action::CreateAlbum { album: year, .. } = &plan.actions[1] else {
            panic!("expected album");
        };
        assert_eq!(year.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(year.seq, 5);

        let Action::CreateAlbum { album: trip, .. } = &plan.actions[2] else {
            panic!("expected album");
        };
        assert_eq!(trip.parent_id.as_deref(), Some(year.id.as_str()));
        assert_eq!(trip.rel_path, "2024/trip");

        let Action::CreateMediaObject { album_id, .. } = &plan.actions[0] else {
            panic!("expected media");
        };
        assert_eq!(album_id, &existing.id);
    }

    #[test]
    fn test_orphans_media_first_then_deepest_albums() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let trips = fx.album(&root, "trips");
        let rome = fx.album(&trips, "rome");
        let entry = fx.write("trips/rome/x.jpg", b"x");
        fx.record(&rome, &entry, b"x");
        fs::remove_dir_all(fx.temp.path().join("trips")).unwrap();

        let plan = fx.plan(SyncOptions::default());
        let orphaned: Vec<_> = plan
            .actions
            .iter()
            .map(|a| (a.label(), a.display_name().to_string()))
            .collect();
        assert_eq!(
            orphaned,
            vec![
                ("orphan_media", "trips/rome/x.jpg".to_string()),
                ("orphan_album", "trips/rome".to_string()),
                ("orphan_album", "trips".to_string()),
            ]
        );
        assert_eq!(plan.total_file_count, 0);
    }

    #[test]
    fn test_orphan_album_restored_when_back() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        fx.album(&root, "back");
        fx.snapshot.albums[1].is_orphan = true;
        fs::create_dir_all(fx.temp.path().join("back")).unwrap();

        let plan = fx.plan(SyncOptions::default());
        assert_eq!(plan.count("restore_album"), 1);
        assert_eq!(plan.count("orphan_album"), 0);
    }

    #[test]
    fn test_already_orphaned_not_marked_again() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        let entry = fx.write("gone.jpg", b"g");
        fx.record(&root, &entry, b"g");
        fx.snapshot.media[0].is_orphan = true;
        fs::remove_file(fx.temp.path().join("gone.jpg")).unwrap();

        assert!(fx.plan(SyncOptions::default()).actions.is_empty());

        fx.settings.orphan_policy = OrphanPolicy::Delete;
        assert_eq!(fx.plan(SyncOptions::default()).count("orphan_media"), 1);
    }

    #[test]
    fn test_without_children_leaves_child_albums_alone() {
        let mut fx = Fixture::new();
        let root = fx.root.clone();
        fx.album(&root, "child");
        fx.write("child/inner.jpg", b"i");
        fx.write("top.jpg", b"t");

        let options = SyncOptions {
            include_child_albums: false,
            ..SyncOptions::default()
        };
        // Snapshot as load_subtree(root, false) would return it
        fx.snapshot.albums.truncate(1);
        let plan = fx.plan(options);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.count("create_media"), 1);
    }
}
