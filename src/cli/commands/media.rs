//! Media object inspection commands.

use crate::cli::commands::{format_timestamp, open_storage};
use crate::cli::MediaCommands;
use crate::error::{Error, Result};
use crate::model::MediaObjectRecord;
use crate::storage::events::{get_events, Event};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct MediaDetails {
    #[serde(flatten)]
    media: MediaObjectRecord,
    rel_path: String,
    events: Vec<EventRow>,
}

#[derive(Serialize)]
struct EventRow {
    event_type: &'static str,
    actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    created_at: String,
}

impl From<Event> for EventRow {
    fn from(e: Event) -> Self {
        Self {
            event_type: e.event_type.as_str(),
            actor: e.actor,
            old_value: e.old_value,
            new_value: e.new_value,
            comment: e.comment,
            created_at: format_timestamp(e.created_at),
        }
    }
}

/// Execute a media command.
///
/// # Errors
///
/// Returns an error if the database is missing or the media object doesn't exist.
pub fn execute(command: &MediaCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    match command {
        MediaCommands::Show { id, events } => {
            let media = storage
                .get_media_object(id)?
                .ok_or_else(|| Error::MediaNotFound { id: id.clone() })?;
            let album_path = storage
                .get_album(&media.album_id)?
                .map(|a| a.rel_path)
                .unwrap_or_default();
            let rel_path = join_path(&album_path, media.filename());
            let history: Vec<EventRow> = get_events(storage.conn(), "media_object", id, Some(*events))?
                .into_iter()
                .map(EventRow::from)
                .collect();

            if json {
                let output = MediaDetails {
                    media,
                    rel_path,
                    events: history,
                };
                println!("{}", serde_json::to_string(&output)?);
                return Ok(());
            }

            print_details(&media, &rel_path, &history);
            Ok(())
        }
    }
}

fn join_path(album_path: &str, filename: &str) -> String {
    if album_path.is_empty() {
        filename.to_string()
    } else {
        format!("{album_path}/{filename}")
    }
}

fn print_details(media: &MediaObjectRecord, rel_path: &str, history: &[EventRow]) {
    let title = if media.is_orphan {
        format!("{rel_path} (orphan)").dimmed()
    } else {
        rel_path.bold()
    };
    println!("{title}");
    println!();
    println!("  ID:        {}", media.id);
    println!("  Album:     {}", media.album_id);
    println!("  Kind:      {}", media.kind.as_str());
    println!("  Size:      {} bytes", media.original.size);
    println!("  Hash:      {}", media.hash_key);
    if let Some(thumb) = &media.thumbnail {
        println!("  Thumbnail: {}", thumb.filename);
    }
    if let Some(optimized) = &media.optimized {
        println!("  Optimized: {}", optimized.filename);
    }
    println!("  Updated:   {} by {}", format_timestamp(media.updated_at), media.modified_by);

    if history.is_empty() {
        return;
    }
    println!();
    println!("{}", "History:".blue().bold());
    for event in history {
        let change = match (&event.old_value, &event.new_value) {
            (Some(old), Some(new)) => format!(" {old} -> {new}"),
            _ => String::new(),
        };
        println!(
            "  {} {}{} {}",
            event.created_at.dimmed(),
            event.event_type.cyan(),
            change,
            format!("({})", event.actor).dimmed()
        );
    }
}
