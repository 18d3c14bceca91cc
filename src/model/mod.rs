//! Data models for the gallery object graph.
//!
//! This module contains the persisted domain models:
//! - Gallery (with its synchronization settings)
//! - AlbumNode
//! - MediaObjectRecord

pub mod album;
pub mod gallery;
pub mod media_object;

pub use album::AlbumNode;
pub use gallery::{Gallery, GallerySettings, MediaKind, OrphanPolicy};
pub use media_object::{MediaObjectRecord, Rendition};
