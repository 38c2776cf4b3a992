//! Inspection and maintenance commands: `bughunt status`, `bughunt clear`.

use anyhow::Result;
use bughunt::config::CliOverrides;
use bughunt::orchestrator::{CheckpointManager, RunStatus};
use bughunt::tracking::{FixStatus, ItemStatus, ItemStore};
use console::style;
use std::path::Path;

use super::super::Cli;

pub async fn cmd_status(cli: &Cli, project_path: &Path, name: Option<String>) -> Result<()> {
    let _log_guard = super::start_logging(cli, None)?;
    let config = super::load_config(
        cli,
        project_path,
        CliOverrides {
            name,
            ..Default::default()
        },
    )?;
    let store = ItemStore::open(&config.state_dir)?;
    let state = store.load_initial_state()?;
    let checkpoints = CheckpointManager::open(store.pointer_path(), &store.checkpoint_db_path())?;

    println!();
    println!("{} {}", style("Project:").bold(), config.project_name);
    println!("{} {}", style("State:").bold(), config.state_dir.display());
    println!();
    println!("Items: {}", state.items.len());
    for status in ItemStatus::all() {
        let ids: Vec<String> = state
            .items
            .values()
            .filter(|item| item.status == status)
            .map(|item| item.id.to_string())
            .collect();
        if !ids.is_empty() {
            println!("  {:<18} {:>3}  {}", status.as_str(), ids.len(), style(ids.join(" ")).dim());
        }
    }
    println!("Queue: {} entrypoint(s)", state.queue.len());
    for entry in &state.queue {
        println!("  {}", style(entry).dim());
    }

    let count = |s: FixStatus| state.fixes.values().filter(|f| f.status == s).count();
    println!(
        "Fixes: {} in review, {} finished, {} rejected",
        count(FixStatus::InReview),
        count(FixStatus::Finished),
        count(FixStatus::Rejected)
    );
    for fix in state.fixes.values() {
        if let Some(note) = &fix.manual_adjustments {
            println!("  {} {}: {}", style("!").red().bold(), fix.item_id, note);
        }
    }

    match checkpoints.status().await? {
        RunStatus::None => println!("Run: none"),
        RunStatus::Active { run_id } => {
            println!("Run: {} {}", run_id, style("(incomplete, resumable)").yellow())
        }
        RunStatus::Completed { run_id } => println!("Run: {} (completed)", run_id),
    }
    println!();
    Ok(())
}

pub fn cmd_clear(cli: &Cli, project_path: &Path, name: Option<String>, yes: bool) -> Result<()> {
    use dialoguer::Confirm;

    let _log_guard = super::start_logging(cli, None)?;
    let config = super::load_config(
        cli,
        project_path,
        CliOverrides {
            name,
            ..Default::default()
        },
    )?;

    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Remove all POTENTIAL and IN_ANALYSIS items for {}?",
                config.project_name
            ))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Clear cancelled");
            return Ok(());
        }
    }

    let store = ItemStore::open(&config.state_dir)?;
    let _lock = store.lock()?;
    let summary = store.clear()?;
    // A resumed snapshot would bring the removed items back.
    let checkpoints = CheckpointManager::open(store.pointer_path(), &store.checkpoint_db_path())?;
    checkpoints.clear_pointer()?;

    println!(
        "Removed {} item(s), dropped {} queue entr{}",
        summary.removed_items.len(),
        summary.dropped_queue_entries,
        if summary.dropped_queue_entries == 1 { "y" } else { "ies" }
    );
    for id in &summary.removed_items {
        println!("  {}", style(id).dim());
    }
    Ok(())
}
