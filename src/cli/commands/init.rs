//! Initialize the gallery database.
//!
//! Creates the SQLite database at the resolved location (see
//! [`resolve_db_path`]) with the full schema, and writes a default
//! `~/.gallerysync/config.json` when none exists yet.

use crate::config::{resolve_db_path, save_settings_to, settings_path, SyncSettings};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PathBuf>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, or an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine database location".to_string()))?;

    if db_path.exists() && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if db_path.exists() {
        fs::remove_file(&db_path)?;
        // Stale WAL files would resurrect the old contents
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.clone().into_os_string();
            sidecar.push(suffix);
            let _ = fs::remove_file(PathBuf::from(sidecar));
        }
    }

    SqliteStorage::open(&db_path)?;
    debug!(path = %db_path.display(), "Database created");

    // The settings file is a convenience; a read-only home shouldn't fail init
    let config = match settings_path() {
        Ok(path) if !path.exists() => match save_settings_to(&path, &SyncSettings::default()) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(error = %e, "Could not write default settings");
                None
            }
        },
        _ => None,
    };

    if json {
        let output = InitOutput {
            database: db_path,
            config,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized gallery database");
        println!("  Database: {}", db_path.display());
        if let Some(config) = config {
            println!("  Settings: {}", config.display());
        }
        println!();
        println!("Next: gsync gallery create <name> <media-root>");
    }

    Ok(())
}
