//! Human-readable display of run snapshots.

use colored::{ColoredString, Colorize};

use crate::sync::types::{SyncState, SyncStatus};

/// Colored label for a run state.
#[must_use]
pub fn state_label(state: SyncState) -> ColoredString {
    match state {
        SyncState::Completed => state.as_str().green().bold(),
        SyncState::Error => state.as_str().red().bold(),
        SyncState::Cancelled => state.as_str().yellow().bold(),
        SyncState::NotStarted => state.as_str().dimmed(),
        _ => state.as_str().cyan(),
    }
}

/// One-line progress summary, e.g. `[#####     ] 50% 5/10 img05.jpg`.
#[must_use]
pub fn progress_line(status: &SyncStatus) -> String {
    const WIDTH: usize = 20;
    let filled = usize::from(status.percent_complete) * WIDTH / 100;
    let mut line = format!(
        "[{}{}] {:>3}% {}/{}",
        "#".repeat(filled),
        " ".repeat(WIDTH - filled),
        status.percent_complete,
        status.current_file_index,
        status.total_file_count
    );
    if let Some(name) = &status.current_file_name {
        line.push(' ');
        line.push_str(name);
    }
    line
}

/// Print a run snapshot to stdout.
pub fn print_status(status: &SyncStatus) {
    println!("{}", "Synchronization".bold().underline());
    println!();
    println!("  Run:      {}", status.synch_id);
    println!("  Gallery:  {}", status.gallery_id);
    println!("  Album:    {}", status.album_id);
    println!("  State:    {}", state_label(status.state));
    println!("  Progress: {}", progress_line(status));
    println!("  Started:  {}", format_timestamp(status.start_time));
    if let Some(end) = status.end_time {
        println!("  Finished: {} ({})", format_timestamp(end), format_elapsed(end - status.start_time));
    }
    if status.cancel_requested && !status.state.is_terminal() {
        println!("  {}", "Cancellation requested".yellow());
    }

    if let Some(err) = &status.error_info {
        println!();
        println!("{} {}", "Error:".red().bold(), err);
    }

    let stats = &status.stats;
    println!();
    println!("{}", "Changes:".blue().bold());
    println!(
        "  Albums:  {} created, {} restored, {} renamed, {} orphaned",
        stats.albums_created, stats.albums_restored, stats.albums_renamed, stats.albums_orphaned
    );
    println!(
        "  Media:   {} created, {} updated, {} relocated, {} unchanged, {} orphaned",
        stats.media_created,
        stats.media_updated,
        stats.media_relocated,
        stats.media_unchanged,
        stats.media_orphaned
    );

    if !status.skipped_files.is_empty() {
        println!();
        println!("{} ({})", "Skipped:".yellow().bold(), status.skipped_files.len());
        for skip in &status.skipped_files {
            println!("  {} [{}] {}", skip.rel_path, skip.reason, skip.message.dimmed());
        }
    }
}

/// Print a table of runs, newest first.
pub fn print_runs(runs: &[SyncStatus]) {
    if runs.is_empty() {
        println!("{}", "No synchronization runs.".dimmed());
        return;
    }

    println!("{}", "Synchronization Runs".bold().underline());
    for run in runs {
        println!(
            "  {}  {:<16} {:>4}/{:<4} skipped {:<3} {}",
            run.synch_id,
            state_label(run.state),
            run.current_file_index,
            run.total_file_count,
            run.skipped_files.len(),
            format_timestamp(run.start_time).dimmed()
        );
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Format a millisecond span as a short duration.
fn format_elapsed(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}.{}s", secs, (ms.max(0) % 1000) / 100)
    }
}
