//! Content hashing for change and rename detection.
//!
//! A media object's hash key is the SHA-256 of its original file. Files are
//! streamed through the hasher so large videos never load into memory.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// Compute the SHA-256 of a file's contents as lowercase hex.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be opened or read.
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 of an in-memory buffer as lowercase hex.
#[must_use]
pub fn bytes_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Check if content has changed against a stored hash key.
///
/// An empty stored key (never hashed) always counts as changed.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: &str) -> bool {
    stored_hash.is_empty() || stored_hash != current_hash
}
