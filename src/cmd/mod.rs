//! CLI command implementations.
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `run`    | `Run`             |
//! | `state`  | `Status`, `Clear` |
//! | `config` | `Config`          |
//! | `task`   | `Task`            |

pub mod config;
pub mod run;
pub mod state;
pub mod task;

pub use config::cmd_config;
pub use run::cmd_run;
pub use state::{cmd_clear, cmd_status};
pub use task::{TaskArgs, cmd_task};

use anyhow::Result;
use bughunt::config::{CliOverrides, Config};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

use super::Cli;

/// Resolve configuration for `project_path` with the global flags applied.
fn load_config(cli: &Cli, project_path: &Path, mut overrides: CliOverrides) -> Result<Config> {
    overrides.state_dir = cli.state_dir.clone();
    overrides.verbose = cli.verbose;
    Config::new(project_path, overrides)
}

fn start_logging(cli: &Cli, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    bughunt::logging::init(log_dir, cli.verbose, cli.log_json)
}
