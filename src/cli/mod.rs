//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::model::OrphanPolicy;

pub mod commands;

/// gsync - keep gallery albums in step with their media directories
#[derive(Parser, Debug)]
#[command(name = "gsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.gallerysync/data/gallery.db)
    #[arg(long, global = true, env = "GSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "GSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the gallery database
    Init {
        /// Overwrite existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Gallery management
    Gallery {
        #[command(subcommand)]
        command: GalleryCommands,
    },

    /// Album inspection
    Album {
        #[command(subcommand)]
        command: AlbumCommands,
    },

    /// Media object inspection
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },

    /// Synchronize albums with the media directory
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// What happens to records whose file is gone.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrphanPolicyArg {
    /// Keep the record, flagged as orphaned
    Mark,
    /// Remove the record
    Delete,
}

impl From<OrphanPolicyArg> for OrphanPolicy {
    fn from(arg: OrphanPolicyArg) -> Self {
        match arg {
            OrphanPolicyArg::Mark => Self::Mark,
            OrphanPolicyArg::Delete => Self::Delete,
        }
    }
}

// ============================================================================
// Gallery Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum GalleryCommands {
    /// Register a gallery over a media directory
    Create(GalleryCreateArgs),

    /// List all galleries
    List,

    /// Show gallery details
    Show {
        /// Gallery ID
        id: String,
    },

    /// Change a gallery's synchronization settings
    Configure(GalleryConfigureArgs),
}

#[derive(Args, Debug)]
pub struct GalleryCreateArgs {
    /// Display name
    pub name: String,

    /// Media root directory
    pub media_root: PathBuf,

    /// Don't match renamed or moved files by content
    #[arg(long)]
    pub no_detect_renamed: bool,

    /// Import files with unknown extensions as generic media
    #[arg(long)]
    pub allow_unknown_types: bool,

    /// What to do with records whose file is gone
    #[arg(long, value_enum, default_value = "mark")]
    pub orphan_policy: OrphanPolicyArg,
}

#[derive(Args, Debug)]
pub struct GalleryConfigureArgs {
    /// Gallery ID
    pub id: String,

    /// Match renamed or moved files by content
    #[arg(long)]
    pub detect_renamed: Option<bool>,

    /// Import files with unknown extensions as generic media
    #[arg(long)]
    pub allow_unknown_types: Option<bool>,

    /// Skip dot-files and dot-directories
    #[arg(long)]
    pub skip_hidden: Option<bool>,

    /// What to do with records whose file is gone
    #[arg(long, value_enum)]
    pub orphan_policy: Option<OrphanPolicyArg>,
}

// ============================================================================
// Album Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum AlbumCommands {
    /// Print the album hierarchy with media counts
    Tree {
        /// Gallery ID
        gallery_id: String,

        /// Include orphaned albums
        #[arg(long)]
        all: bool,
    },
}

// ============================================================================
// Media Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum MediaCommands {
    /// Show a media object and its recent history
    Show {
        /// Media object ID
        id: String,

        /// Number of audit events to show
        #[arg(long, default_value_t = 10)]
        events: u32,
    },
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Start a run and follow it to the end
    Start(SyncStartArgs),

    /// Show a run's latest snapshot
    Status {
        /// Gallery ID
        gallery_id: String,
        /// Run ID
        synch_id: String,
    },

    /// Request cancellation of a run
    Abort {
        /// Gallery ID
        gallery_id: String,
        /// Run ID
        synch_id: String,
    },

    /// List retained runs of a gallery
    List {
        /// Gallery ID
        gallery_id: String,
    },

    /// Delete finished runs past the retention window
    Purge,
}

#[derive(Args, Debug)]
pub struct SyncStartArgs {
    /// Gallery ID
    pub gallery_id: String,

    /// Album to start from (default: gallery root)
    #[arg(long)]
    pub album: Option<String>,

    /// Only the album's own files, not its child directories
    #[arg(long)]
    pub no_child_albums: bool,

    /// Rebuild thumbnails of unchanged files
    #[arg(long)]
    pub regenerate_thumbnails: bool,

    /// Rebuild optimized renditions of unchanged files
    #[arg(long)]
    pub regenerate_optimized: bool,

    /// Re-read metadata of unchanged files
    #[arg(long)]
    pub regenerate_metadata: bool,
}
