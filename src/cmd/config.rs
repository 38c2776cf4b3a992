//! Configuration view and validation commands: `bughunt config`.

use anyhow::{Context, Result};
use bughunt::config::{CONFIG_DIR, CONFIG_FILE, CliOverrides, HuntToml};
use std::path::Path;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_path.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = super::load_config(cli, project_path, CliOverrides::default())?;
            println!();
            println!("bughunt configuration");
            println!("=====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No bughunt.toml found at {}, using defaults", config_path.display());
            }
            println!();

            println!("[project]");
            println!("  name = \"{}\"", config.project_name);
            if let Some(subdir) = &config.subdir {
                println!("  subdir = \"{}\"", subdir);
            }
            println!("  id_prefix = \"{}\"", config.id_prefix);
            println!("  state_dir = \"{}\"", config.state_dir.display());
            println!("  worktree_base = \"{}\"", config.worktree_base.display());
            println!();
            println!("[pipeline]");
            println!("  fix_strategy = \"{}\"", config.fix_strategy);
            println!("  max_review_attempts = {}", config.max_review_attempts);
            println!("  max_output_retries = {}", config.max_output_retries);
            println!("  max_stalled_passes = {}", config.max_stalled_passes);
            println!();
            println!("[claude]");
            println!("  cmd = \"{}\"", config.claude_cmd);
            println!("  skip_permissions = {}", config.skip_permissions);
            println!("  default_model = \"{}\"", config.default_model);
            println!("  classify_model = \"{}\"", config.classify_model);
            println!("  tdd_model = \"{}\"", config.tdd_model);
            println!("  read_tools = {:?}", config.read_tools);
            println!("  write_tools = {:?}", config.write_tools);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No bughunt.toml found. Using defaults (valid).");
                return Ok(());
            }
            let toml = HuntToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("bughunt.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create {}", config_dir.display()))?;
            HuntToml::default().save(&config_path)?;
            println!("Created bughunt.toml at {}", config_path.display());
        }
    }

    Ok(())
}
