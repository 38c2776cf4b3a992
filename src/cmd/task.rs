//! Standalone test-first fix loop: `bughunt task`.

use anyhow::{Context, Result, bail};
use bughunt::config::CliOverrides;
use bughunt::gateway::ClaudeGateway;
use bughunt::tdd::{TaskKind, TddConfig, TddSettings, TddStatus, TddWorkflow};
use bughunt::ui::icons::{CHECK, CROSS, STALL};
use console::style;
use std::path::PathBuf;

use super::super::Cli;

pub struct TaskArgs {
    pub kind: TaskKind,
    pub id: String,
    pub description: String,
    pub details: String,
    pub files: Vec<String>,
    pub dir: PathBuf,
    pub max_review_attempts: u32,
}

pub async fn cmd_task(cli: &Cli, args: TaskArgs) -> Result<()> {
    let _log_guard = super::start_logging(cli, None)?;
    let config = super::load_config(cli, &args.dir, CliOverrides::default())?;
    let worktree = args
        .dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve task directory: {}", args.dir.display()))?;

    let gateway = ClaudeGateway::new(&config.claude_cmd, config.skip_permissions);
    let workflow = TddWorkflow::new(
        &gateway,
        TddSettings {
            model: config.tdd_model.clone(),
            write_tools: config.write_tools.clone(),
            read_tools: config.read_tools.clone(),
            max_output_retries: config.max_output_retries,
        },
    );
    let task = TddConfig {
        task_id: args.id,
        kind: args.kind,
        worktree,
        description: args.description,
        details: args.details,
        relevant_files: args.files,
        max_review_attempts: args.max_review_attempts,
    };

    println!(
        "Running {} task {} in {}",
        task.kind,
        style(&task.task_id).bold(),
        task.worktree.display()
    );
    let result = workflow.run(&task).await;

    let icon = match result.status {
        TddStatus::Success => CHECK,
        TddStatus::Discarded => CROSS,
        TddStatus::MaxAttemptsReached => STALL,
    };
    println!();
    println!("{}{} {}", icon, style(&result.task_id).bold(), result.status);
    println!("  Review attempts: {}", result.review_attempts);
    if let Some(path) = &result.test_file_path {
        println!("  Test file: {}", path);
    }
    if !result.notes.trim().is_empty() {
        println!("  Notes: {}", result.notes.trim());
    }
    for (i, reason) in result.rejection_history.iter().enumerate() {
        println!("  Rejection {}: {}", i + 1, reason);
    }

    if result.status == TddStatus::MaxAttemptsReached {
        bail!(
            "{} still rejected after {} review attempts; needs manual adjustment",
            result.task_id,
            result.review_attempts
        );
    }
    Ok(())
}
