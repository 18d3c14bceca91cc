//! Synchronization commands.
//!
//! - `gsync sync start <gallery-id>` - Start a run and follow its progress
//! - `gsync sync status <gallery-id> <synch-id>` - Show a run's snapshot
//! - `gsync sync abort <gallery-id> <synch-id>` - Request cancellation
//! - `gsync sync list <gallery-id>` - List retained runs
//! - `gsync sync purge` - Delete expired runs

use crate::cli::commands::require_db_path;
use crate::cli::{SyncCommands, SyncStartArgs};
use crate::config::{load_settings, resolve_actor};
use crate::error::{Error, Result};
use crate::sync::status::{print_runs, print_status, progress_line, state_label};
use crate::sync::{BasicPipeline, SyncOptions, SyncState, SyncStatus, Synchronizer};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct RunListOutput<'a> {
    gallery_id: &'a str,
    runs: &'a [SyncStatus],
    count: usize,
}

#[derive(Serialize)]
struct PurgeOutput {
    purged: usize,
}

/// Execute a sync command.
///
/// # Errors
///
/// Returns an error if the database is missing, the run cannot be started,
/// or a followed run ends in Error.
pub fn execute(
    command: &SyncCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let db_path = require_db_path(db_path)?;
    let settings = load_settings()?;
    let engine = Synchronizer::new(&db_path, settings, &resolve_actor(actor))?;

    match command {
        SyncCommands::Start(args) => start(&engine, args, json),

        SyncCommands::Status {
            gallery_id,
            synch_id,
        } => {
            let status = engine.get_status(gallery_id, synch_id)?;
            output_status(&status, json)
        }

        SyncCommands::Abort {
            gallery_id,
            synch_id,
        } => {
            let status = engine.abort(gallery_id, synch_id)?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else if status.state.is_terminal() {
                println!(
                    "Run {} already finished ({}); nothing to cancel.",
                    status.synch_id,
                    state_label(status.state)
                );
            } else {
                println!(
                    "Cancellation requested for run {}; it stops before its next file.",
                    status.synch_id
                );
            }
            Ok(())
        }

        SyncCommands::List { gallery_id } => {
            let runs = engine.list_runs(gallery_id)?;
            if json {
                let output = RunListOutput {
                    gallery_id,
                    runs: &runs,
                    count: runs.len(),
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                print_runs(&runs);
            }
            Ok(())
        }

        SyncCommands::Purge => {
            let purged = engine.purge()?;
            if json {
                println!("{}", serde_json::to_string(&PurgeOutput { purged })?);
            } else {
                println!("Purged {purged} expired run(s).");
            }
            Ok(())
        }
    }
}

fn start(engine: &Synchronizer, args: &SyncStartArgs, json: bool) -> Result<()> {
    let options = SyncOptions {
        include_child_albums: !args.no_child_albums,
        regenerate_thumbnails: args.regenerate_thumbnails,
        regenerate_optimized: args.regenerate_optimized,
        regenerate_metadata: args.regenerate_metadata,
    };

    let synch_id = engine.start(
        &args.gallery_id,
        args.album.as_deref(),
        options,
        Box::new(BasicPipeline),
    )?;
    if !json {
        println!("Started run {synch_id}");
    }

    let mut last_line = String::new();
    let status = engine.wait_with(&args.gallery_id, &synch_id, |status| {
        if json || status.state != SyncState::ProcessingFiles {
            return;
        }
        let line = progress_line(status);
        if line != last_line {
            println!("  {line}");
            last_line = line;
        }
    })?;

    if !json {
        println!();
    }
    output_status(&status, json)?;

    // A followed run that failed fails the command
    if status.state == SyncState::Error {
        return Err(Error::SyncFailed(
            status
                .error_info
                .unwrap_or_else(|| "run ended in error".to_string()),
        ));
    }
    Ok(())
}

fn output_status(status: &SyncStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
    } else {
        print_status(status);
    }
    Ok(())
}
