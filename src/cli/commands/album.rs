//! Album inspection commands.

use crate::cli::commands::open_storage;
use crate::cli::AlbumCommands;
use crate::error::Result;
use crate::model::AlbumNode;
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Serialize)]
struct AlbumTreeNode {
    id: String,
    name: String,
    rel_path: String,
    media_count: usize,
    is_orphan: bool,
    children: Vec<AlbumTreeNode>,
}

/// Execute an album command.
///
/// # Errors
///
/// Returns an error if the database is missing or the gallery doesn't exist.
pub fn execute(command: &AlbumCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    match command {
        AlbumCommands::Tree { gallery_id, all } => {
            let gallery = storage.require_gallery(gallery_id)?;
            let albums: Vec<AlbumNode> = storage
                .list_albums(gallery_id)?
                .into_iter()
                .filter(|a| *all || !a.is_orphan)
                .collect();
            let counts = storage.count_media_by_album(gallery_id)?;

            let Some(root) = albums.iter().find(|a| a.is_root()) else {
                println!("Gallery {} has no root album.", gallery.id);
                return Ok(());
            };
            let tree = build_tree(root, &albums, &counts);

            if json {
                println!("{}", serde_json::to_string(&tree)?);
            } else {
                println!("{} {}", gallery.name.bold(), format!("({})", gallery.media_root).dimmed());
                print_node(&tree, 0);
            }
            Ok(())
        }
    }
}

fn build_tree(
    node: &AlbumNode,
    albums: &[AlbumNode],
    counts: &HashMap<String, usize>,
) -> AlbumTreeNode {
    let mut children: Vec<&AlbumNode> = albums
        .iter()
        .filter(|a| a.parent_id.as_deref() == Some(node.id.as_str()))
        .collect();
    children.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.directory_name.cmp(&b.directory_name)));

    AlbumTreeNode {
        id: node.id.clone(),
        name: if node.is_root() {
            "/".to_string()
        } else {
            node.directory_name.clone()
        },
        rel_path: node.rel_path.clone(),
        media_count: counts.get(&node.id).copied().unwrap_or(0),
        is_orphan: node.is_orphan,
        children: children
            .into_iter()
            .map(|child| build_tree(child, albums, counts))
            .collect(),
    }
}

fn print_node(node: &AlbumTreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let name = if node.is_orphan {
        format!("{} (orphan)", node.name).dimmed()
    } else {
        node.name.normal()
    };
    println!(
        "{indent}{} {} {}",
        name,
        format!("[{} media]", node.media_count).cyan(),
        node.id.dimmed()
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}
