//! Media processing boundary.
//!
//! The engine hands each new or changed file to a [`MediaPipeline`] and gets
//! back either the facts to persist or a typed failure. Rendition generation
//! and metadata extraction live behind this trait; [`BasicPipeline`] only
//! fingerprints the original.

use crate::model::{MediaKind, MediaObjectRecord, Rendition};
use crate::sync::hash::file_hash;
use crate::sync::types::{SkipReason, SyncOptions};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// One file to process.
#[derive(Debug, Clone)]
pub struct ProcessRequest<'a> {
    /// Absolute path of the source file.
    pub source: PathBuf,
    /// Path relative to the media root.
    pub rel_path: &'a str,
    pub file_name: &'a str,
    pub destination_album_id: &'a str,
    pub kind: MediaKind,
    pub options: SyncOptions,
    /// The record being refreshed, for updates.
    pub existing: Option<&'a MediaObjectRecord>,
}

/// What a pipeline produced for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMedia {
    pub kind: MediaKind,
    /// SHA-256 of the original (hex)
    pub hash_key: String,
    pub original: Rendition,
    pub optimized: Option<Rendition>,
    pub thumbnail: Option<Rendition>,
}

/// Why a file could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessFailure {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Corrupt or unreadable file: {0}")]
    CorruptFile(String),

    #[error("Insufficient storage: {0}")]
    InsufficientStorage(String),

    /// The album's rendition directory cannot be written at all.
    #[error("Destination album is not writable: {0}")]
    DestinationUnwritable(String),
}

impl ProcessFailure {
    /// Skip reason for per-item failures; `None` if the run must stop.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::UnsupportedMediaType(_) => Some(SkipReason::UnsupportedType),
            Self::CorruptFile(_) => Some(SkipReason::CorruptFile),
            Self::InsufficientStorage(_) => Some(SkipReason::InsufficientStorage),
            Self::DestinationUnwritable(_) => None,
        }
    }

    /// Classify an I/O error raised while reading a source file.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            Self::InsufficientStorage(err.to_string())
        } else {
            Self::CorruptFile(err.to_string())
        }
    }
}

/// Turns a source file into persistable media facts.
pub trait MediaPipeline: Send {
    /// Process one file.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessFailure`] describing why the file was not processed.
    fn process(&self, request: &ProcessRequest<'_>) -> Result<ProcessedMedia, ProcessFailure>;
}

/// Fingerprints originals without producing renditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPipeline;

impl MediaPipeline for BasicPipeline {
    fn process(&self, request: &ProcessRequest<'_>) -> Result<ProcessedMedia, ProcessFailure> {
        let meta = std::fs::metadata(&request.source).map_err(|e| ProcessFailure::from_io(&e))?;
        if !meta.is_file() {
            return Err(ProcessFailure::CorruptFile(format!(
                "{} is not a regular file",
                request.rel_path
            )));
        }
        if meta.len() == 0 {
            return Err(ProcessFailure::CorruptFile(format!(
                "{} is empty",
                request.rel_path
            )));
        }

        let hash_key = file_hash(&request.source).map_err(|e| ProcessFailure::from_io(&e))?;

        Ok(ProcessedMedia {
            kind: request.kind,
            hash_key,
            original: Rendition {
                filename: request.file_name.to_string(),
                width: None,
                height: None,
                size: meta.len(),
            },
            optimized: None,
            thumbnail: None,
        })
    }
}
