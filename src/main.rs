use anyhow::Result;
use bughunt::config::FixStrategy;
use bughunt::tdd::TaskKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "bughunt")]
#[command(version, about = "Restartable bug-hunting orchestrator driven by a coding agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory for per-project state. Overrides BUGHUNT_STATE_DIR and bughunt.toml.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hunt for bugs in a project, resuming an interrupted run if there is one
    Run {
        /// Path to the git repository to hunt in
        project_path: PathBuf,

        /// Project name used for the state directory (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Subdirectory the agent works in, for monorepos
        #[arg(long)]
        subdir: Option<String>,

        /// Resume an incomplete run without asking
        #[arg(long, conflicts_with = "no_resume")]
        resume: bool,

        /// Always start a fresh run
        #[arg(long)]
        no_resume: bool,

        /// Fix strategy: staged or tdd
        #[arg(long)]
        strategy: Option<FixStrategy>,
    },
    /// Show tracked items, fixes and any incomplete run
    Status {
        #[arg(default_value = ".")]
        project_path: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },
    /// Drop unconfirmed items and the entrypoint queue
    Clear {
        #[arg(default_value = ".")]
        project_path: PathBuf,

        #[arg(long)]
        name: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// View, validate or create bughunt.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,

        /// Project whose .bughunt/bughunt.toml is used
        #[arg(long, default_value = ".", global = true)]
        project_path: PathBuf,
    },
    /// Run the test-first fix loop on a single task
    Task {
        /// Task kind: bug-fix, feature or refactor
        kind: TaskKind,

        /// Task identifier used in commit messages
        id: String,

        #[arg(long)]
        description: String,

        #[arg(long, default_value = "")]
        details: String,

        /// Files relevant to the task (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Directory the agent works in
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        #[arg(long, default_value = "3")]
        max_review_attempts: u32,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Create a default bughunt.toml
    Init,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            project_path,
            name,
            subdir,
            resume,
            no_resume,
            strategy,
        } => {
            let resume = match (*resume, *no_resume) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd::cmd_run(
                &cli,
                project_path,
                name.clone(),
                subdir.clone(),
                resume,
                *strategy,
            )
            .await?;
        }
        Commands::Status { project_path, name } => {
            cmd::cmd_status(&cli, project_path, name.clone()).await?
        }
        Commands::Clear {
            project_path,
            name,
            yes,
        } => cmd::cmd_clear(&cli, project_path, name.clone(), *yes)?,
        Commands::Config {
            command,
            project_path,
        } => cmd::cmd_config(&cli, project_path, command.clone())?,
        Commands::Task {
            kind,
            id,
            description,
            details,
            files,
            dir,
            max_review_attempts,
        } => {
            cmd::cmd_task(
                &cli,
                cmd::TaskArgs {
                    kind: *kind,
                    id: id.clone(),
                    description: description.clone(),
                    details: details.clone(),
                    files: files.clone(),
                    dir: dir.clone(),
                    max_review_attempts: *max_review_attempts,
                },
            )
            .await?
        }
    }

    Ok(())
}
