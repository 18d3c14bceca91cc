//! Directory walker.
//!
//! Enumerates an album's directory subtree lazily, in pre-order with siblings
//! sorted by name, so two walks of an unchanged tree yield the same sequence.
//! A failing entry becomes a [`WalkItem::Skipped`] and the walk goes on.

use crate::error::{Error, Result};
use crate::sync::types::{SkipEntry, SkipReason};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
}

/// One successfully inspected filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub kind: EntryKind,
    /// Path relative to the media root, `/`-separated.
    pub rel_path: String,
    pub name: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time (Unix milliseconds, 0 if unavailable)
    pub mtime: i64,
}

impl WalkEntry {
    /// Relative path of the containing directory (empty for the media root).
    #[must_use]
    pub fn parent_rel_path(&self) -> &str {
        self.rel_path.rsplit_once('/').map_or("", |(parent, _)| parent)
    }
}

/// Result of probing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    Entry(WalkEntry),
    Skipped(SkipEntry),
}

/// Walks one album directory below a gallery's media root.
#[derive(Debug, Clone)]
pub struct DirectoryWalker {
    media_root: PathBuf,
    start: PathBuf,
    include_children: bool,
    skip_hidden: bool,
}

impl DirectoryWalker {
    /// Prepare a walk of `start_rel` (relative to `media_root`).
    ///
    /// # Errors
    ///
    /// Returns an error if the start directory does not exist or is not a
    /// directory. Without a readable start directory there is nothing to
    /// reconcile against.
    pub fn new(
        media_root: &Path,
        start_rel: &str,
        include_children: bool,
        skip_hidden: bool,
    ) -> Result<Self> {
        let start = if start_rel.is_empty() {
            media_root.to_path_buf()
        } else {
            media_root.join(start_rel)
        };

        if !start.is_dir() {
            return Err(Error::SyncFailed(format!(
                "Album directory is not accessible: {}",
                start.display()
            )));
        }

        Ok(Self {
            media_root: media_root.to_path_buf(),
            start,
            include_children,
            skip_hidden,
        })
    }

    /// Lazily enumerate the subtree.
    ///
    /// Directories precede their contents. With child albums excluded only
    /// the start directory's files are produced.
    pub fn walk(&self) -> impl Iterator<Item = WalkItem> + '_ {
        let mut walker = WalkDir::new(&self.start)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        if !self.include_children {
            walker = walker.max_depth(1);
        }

        let skip_hidden = self.skip_hidden;
        walker
            .into_iter()
            .filter_entry(move |e| !(skip_hidden && is_hidden(e)))
            .filter_map(move |result| match result {
                Ok(entry) => self.inspect(&entry),
                Err(err) => {
                    let rel = err
                        .path()
                        .and_then(|p| self.relative(p))
                        .unwrap_or_default();
                    debug!(path = %rel, error = %err, "Walk entry failed");
                    Some(WalkItem::Skipped(SkipEntry::new(
                        &rel,
                        SkipReason::IoError,
                        err.to_string(),
                    )))
                }
            })
    }

    fn inspect(&self, entry: &DirEntry) -> Option<WalkItem> {
        let Some(rel_path) = self.relative(entry.path()) else {
            let lossy = entry.path().to_string_lossy().to_string();
            return Some(WalkItem::Skipped(SkipEntry::new(
                &lossy,
                SkipReason::IoError,
                "File name is not valid UTF-8",
            )));
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if !self.include_children {
                return None;
            }
            return Some(WalkItem::Entry(WalkEntry {
                kind: EntryKind::Directory,
                name: entry.file_name().to_string_lossy().to_string(),
                rel_path,
                size: 0,
                mtime: 0,
            }));
        }

        if file_type.is_symlink() {
            return Some(WalkItem::Skipped(SkipEntry::new(
                &rel_path,
                SkipReason::IoError,
                "Symbolic links are not followed",
            )));
        }

        match entry.metadata() {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .and_then(|d| i64::try_from(d.as_millis()).ok())
                    .unwrap_or(0);
                Some(WalkItem::Entry(WalkEntry {
                    kind: EntryKind::File,
                    name: entry.file_name().to_string_lossy().to_string(),
                    rel_path,
                    size: meta.len(),
                    mtime,
                }))
            }
            Err(err) => Some(WalkItem::Skipped(SkipEntry::new(
                &rel_path,
                SkipReason::IoError,
                err.to_string(),
            ))),
        }
    }

    /// `/`-joined path relative to the media root; `None` for non-UTF-8 names.
    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.media_root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_str()?);
            }
        }
        Some(parts.join("/"))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("b_album/nested")).unwrap();
        fs::create_dir_all(root.join("a_album")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("z.jpg"), b"zz").unwrap();
        fs::write(root.join("a.jpg"), b"a").unwrap();
        fs::write(root.join(".hidden.jpg"), b"h").unwrap();
        fs::write(root.join(".cache/inside.jpg"), b"c").unwrap();
        fs::write(root.join("a_album/one.png"), b"one").unwrap();
        fs::write(root.join("b_album/nested/deep.gif"), b"deep").unwrap();
        temp
    }

    fn paths(walker: &DirectoryWalker) -> Vec<String> {
        walker
            .walk()
            .map(|item| match item {
                WalkItem::Entry(e) => e.rel_path,
                WalkItem::Skipped(s) => format!("!{}", s.rel_path),
            })
            .collect()
    }

    #[test]
    fn test_preorder_sorted_and_hidden_pruned() {
        let temp = tree();
        let walker = DirectoryWalker::new(temp.path(), "", true, true).unwrap();

        assert_eq!(
            paths(&walker),
            vec![
                "a.jpg",
                "a_album",
                "a_album/one.png",
                "b_album",
                "b_album/nested",
                "b_album/nested/deep.gif",
                "z.jpg",
            ]
        );
    }

    #[test]
    fn test_walk_is_deterministic() {
        let temp = tree();
        let walker = DirectoryWalker::new(temp.path(), "", true, false).unwrap();
        let first = paths(&walker);
        assert_eq!(first, paths(&walker));
        assert!(first.contains(&".cache/inside.jpg".to_string()));
    }

    #[test]
    fn test_without_children_only_direct_files() {
        let temp = tree();
        let walker = DirectoryWalker::new(temp.path(), "b_album", false, true).unwrap();
        assert!(paths(&walker).is_empty());

        let walker = DirectoryWalker::new(temp.path(), "a_album", false, true).unwrap();
        assert_eq!(paths(&walker), vec!["a_album/one.png"]);
    }

    #[test]
    fn test_entry_facts() {
        let temp = tree();
        let walker = DirectoryWalker::new(temp.path(), "b_album", true, true).unwrap();
        let items: Vec<_> = walker.walk().collect();

        let WalkItem::Entry(deep) = &items[1] else {
            panic!("expected entry");
        };
        assert_eq!(deep.kind, EntryKind::File);
        assert_eq!(deep.name, "deep.gif");
        assert_eq!(deep.size, 4);
        assert!(deep.mtime > 0);
        assert_eq!(deep.parent_rel_path(), "b_album/nested");
    }

    #[test]
    fn test_missing_start_directory_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(DirectoryWalker::new(temp.path(), "gone", true, true).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_becomes_skip() {
        let temp = tree();
        std::os::unix::fs::symlink(temp.path().join("missing"), temp.path().join("m_link.jpg"))
            .unwrap();
        let walker = DirectoryWalker::new(temp.path(), "", false, true).unwrap();

        assert_eq!(paths(&walker), vec!["a.jpg", "!m_link.jpg", "z.jpg"]);
    }
}
