//! Gallery management commands.
//!
//! - `gsync gallery create <name> <media-root>` - Register a gallery
//! - `gsync gallery list` - List all galleries
//! - `gsync gallery show <id>` - Show gallery details
//! - `gsync gallery configure <id>` - Change synchronization settings

use crate::cli::commands::{format_timestamp, require_db_path};
use crate::cli::{GalleryCommands, GalleryConfigureArgs, GalleryCreateArgs};
use crate::config::resolve_actor;
use crate::error::{Error, Result};
use crate::model::{Gallery, GallerySettings};
use crate::storage::SqliteStorage;
use crate::sync::ProgressPublisher;
use crate::sync::status::state_label;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct GalleryOutput {
    id: String,
    name: String,
    media_root: String,
    settings: GallerySettings,
    created_at: String,
    updated_at: String,
}

impl From<Gallery> for GalleryOutput {
    fn from(g: Gallery) -> Self {
        Self {
            id: g.id,
            name: g.name,
            media_root: g.media_root,
            settings: g.settings,
            created_at: format_timestamp(g.created_at),
            updated_at: format_timestamp(g.updated_at),
        }
    }
}

#[derive(Serialize)]
struct GalleryListOutput {
    galleries: Vec<GalleryOutput>,
    count: usize,
}

#[derive(Serialize)]
struct GalleryDetails {
    #[serde(flatten)]
    gallery: GalleryOutput,
    root_album_id: Option<String>,
    album_count: usize,
    media_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<LastRun>,
}

#[derive(Serialize)]
struct LastRun {
    synch_id: String,
    state: String,
    started_at: String,
}

/// Execute a gallery command.
///
/// # Errors
///
/// Returns an error if the database is missing or the command fails.
pub fn execute(
    command: &GalleryCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let db_path = require_db_path(db_path)?;
    let mut storage = SqliteStorage::open(&db_path)?;

    match command {
        GalleryCommands::Create(args) => create(&mut storage, args, &resolve_actor(actor), json),
        GalleryCommands::List => list(&storage, json),
        GalleryCommands::Show { id } => show(&storage, &db_path, id, json),
        GalleryCommands::Configure(args) => configure(&mut storage, args, &resolve_actor(actor), json),
    }
}

fn create(storage: &mut SqliteStorage, args: &GalleryCreateArgs, actor: &str, json: bool) -> Result<()> {
    let name = args.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("Gallery name cannot be empty".to_string()));
    }

    let media_root = args.media_root.canonicalize().map_err(|e| {
        Error::InvalidArgument(format!("Media root {}: {e}", args.media_root.display()))
    })?;
    if !media_root.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "Media root {} is not a directory",
            media_root.display()
        )));
    }
    let media_root = media_root
        .to_str()
        .ok_or_else(|| Error::InvalidArgument("Media root must be valid UTF-8".to_string()))?
        .to_string();

    let mut gallery = Gallery::new(name.to_string(), media_root);
    gallery.settings.detect_renamed = !args.no_detect_renamed;
    gallery.settings.allow_unknown_types = args.allow_unknown_types;
    gallery.settings.orphan_policy = args.orphan_policy.into();

    let root = storage.create_gallery(&gallery, actor)?;

    if json {
        #[derive(Serialize)]
        struct Created {
            #[serde(flatten)]
            gallery: GalleryOutput,
            root_album_id: String,
        }
        let output = Created {
            gallery: gallery.into(),
            root_album_id: root.id,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Created gallery: {} ({})", gallery.name, gallery.id);
        println!("  Media root: {}", gallery.media_root);
        println!("  Root album: {}", root.id);
        println!();
        println!("{}", format!("Run 'gsync sync start {}' to import it.", gallery.id).dimmed());
    }
    Ok(())
}

fn list(storage: &SqliteStorage, json: bool) -> Result<()> {
    let galleries = storage.list_galleries()?;

    if json {
        let output = GalleryListOutput {
            count: galleries.len(),
            galleries: galleries.into_iter().map(Into::into).collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if galleries.is_empty() {
        println!("No galleries found.");
        return Ok(());
    }

    println!("Galleries ({}):", galleries.len());
    for g in &galleries {
        println!("  {} {}", g.id.cyan(), g.name.bold());
        println!("    {}", g.media_root.dimmed());
    }
    Ok(())
}

fn show(storage: &SqliteStorage, db_path: &Path, id: &str, json: bool) -> Result<()> {
    let gallery = storage.require_gallery(id)?;
    let albums = storage.list_albums(id)?;
    let media_count: usize = storage.count_media_by_album(id)?.values().sum();
    let root_album_id = albums.iter().find(|a| a.is_root()).map(|a| a.id.clone());

    let last_run = ProgressPublisher::open(db_path)?.list_runs(id)?.into_iter().next();

    if json {
        let output = GalleryDetails {
            gallery: gallery.into(),
            root_album_id,
            album_count: albums.len(),
            media_count,
            last_run: last_run.map(|r| LastRun {
                synch_id: r.synch_id,
                state: r.state.as_str().to_string(),
                started_at: format_timestamp(r.start_time),
            }),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let s = &gallery.settings;
    println!("{}", gallery.name.bold().underline());
    println!();
    println!("  ID:         {}", gallery.id);
    println!("  Media root: {}", gallery.media_root);
    println!("  Albums:     {}", albums.len());
    println!("  Media:      {media_count}");
    println!("  Created:    {}", format_timestamp(gallery.created_at));
    println!();
    println!("{}", "Settings:".blue().bold());
    println!("  Detect renamed:      {}", s.detect_renamed);
    println!("  Allow unknown types: {}", s.allow_unknown_types);
    println!("  Skip hidden:         {}", s.skip_hidden);
    println!("  Orphan policy:       {}", s.orphan_policy.as_str());
    println!("  Extensions:          {}", s.extensions.len());

    if let Some(run) = last_run {
        println!();
        println!(
            "Last run: {} {} ({}/{})",
            run.synch_id,
            state_label(run.state),
            run.current_file_index,
            run.total_file_count
        );
    }
    Ok(())
}

fn configure(
    storage: &mut SqliteStorage,
    args: &GalleryConfigureArgs,
    actor: &str,
    json: bool,
) -> Result<()> {
    let gallery = storage.require_gallery(&args.id)?;
    let mut settings = gallery.settings.clone();

    if let Some(v) = args.detect_renamed {
        settings.detect_renamed = v;
    }
    if let Some(v) = args.allow_unknown_types {
        settings.allow_unknown_types = v;
    }
    if let Some(v) = args.skip_hidden {
        settings.skip_hidden = v;
    }
    if let Some(v) = args.orphan_policy {
        settings.orphan_policy = v.into();
    }

    if settings == gallery.settings {
        return Err(Error::InvalidArgument("No settings to change".to_string()));
    }
    storage.update_gallery_settings(&args.id, &settings, actor)?;

    if json {
        let mut updated = gallery;
        updated.settings = settings;
        println!("{}", serde_json::to_string(&GalleryOutput::from(updated))?);
    } else {
        println!("Updated settings of gallery {}", args.id);
    }
    Ok(())
}
