//! Hunt loop entry point: `bughunt run`.

use anyhow::{Result, bail};
use bughunt::config::{CliOverrides, FixStrategy};
use bughunt::errors::RunError;
use bughunt::gateway::ClaudeGateway;
use bughunt::orchestrator::{
    CheckpointManager, HuntRunner, PhaseExecutor, ResumePolicy, RunOutcome, RunStart,
};
use bughunt::tracking::ItemStore;
use bughunt::ui::HuntUI;
use bughunt::workspace::GitWorkspace;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    project_path: &Path,
    name: Option<String>,
    subdir: Option<String>,
    resume: Option<bool>,
    strategy: Option<FixStrategy>,
) -> Result<()> {
    let config = super::load_config(
        cli,
        project_path,
        CliOverrides {
            name,
            subdir,
            strategy,
            ..Default::default()
        },
    )?;
    config.ensure_directories()?;
    let _log_guard = super::start_logging(cli, Some(&config.log_dir()))?;
    for warning in config.toml.validate() {
        warn!("bughunt.toml: {}", warning);
    }

    let store = ItemStore::open(&config.state_dir)?;
    let _lock = store.lock()?;
    let checkpoints = CheckpointManager::open(store.pointer_path(), &store.checkpoint_db_path())?;

    let ui = Arc::new(HuntUI::new(config.verbose));
    let policy = match resume {
        Some(true) => ResumePolicy::Always,
        Some(false) => ResumePolicy::Never,
        None => ResumePolicy::Ask,
    };
    let start = checkpoints
        .begin(policy, |run_id| ui.confirm_resume(run_id))
        .await?;
    ui.run_started(
        &config.project_name,
        start.run_id(),
        matches!(start, RunStart::Resume { .. }),
    );
    info!(
        project = %config.project_name,
        strategy = %config.fix_strategy,
        state_dir = %config.state_dir.display(),
        "Hunt starting"
    );

    let gateway = ClaudeGateway::new(&config.claude_cmd, config.skip_permissions);
    let workspace = GitWorkspace::new(
        &config.project_dir,
        config.worktree_base.join(&config.project_name),
    );
    let executor = PhaseExecutor::new(&config, &store, &gateway, &workspace);
    let runner = HuntRunner::new(&config, &store, &checkpoints, executor, Some(ui.clone()));

    let run_id = start.run_id().to_string();
    match runner.run(start).await {
        Ok(summary) => {
            ui.finish(&summary);
            if let RunOutcome::Stalled { .. } = summary.outcome {
                bail!("Run {} stalled; run again to resume", summary.run_id);
            }
            Ok(())
        }
        Err(RunError::Cancelled) => {
            ui.abandon("cancelled");
            bail!("Run {run_id} cancelled; state saved, run again to resume")
        }
        Err(e) => {
            ui.abandon("failed");
            Err(e.into())
        }
    }
}
