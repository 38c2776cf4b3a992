//! Configuration: `.bughunt/bughunt.toml`, then environment, then CLI flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".bughunt";
pub const CONFIG_FILE: &str = "bughunt.toml";

/// How the reproduce/fix/review stretch of the pipeline is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStrategy {
    /// Separate reproduce, fix, refactor and review phases.
    #[default]
    Staged,
    /// Reproduce hands the item to the bounded write-tests/implement/review loop.
    Tdd,
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixStrategy::Staged => write!(f, "staged"),
            FixStrategy::Tdd => write!(f, "tdd"),
        }
    }
}

impl FromStr for FixStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staged" => Ok(FixStrategy::Staged),
            "tdd" => Ok(FixStrategy::Tdd),
            _ => anyhow::bail!("Invalid fix strategy '{}'. Valid values: staged, tdd", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Defaults to the project directory name.
    #[serde(default)]
    pub name: Option<String>,
    /// Monorepo subdirectory the agent works in.
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// Relative paths resolve against the working directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_worktree_base")]
    pub worktree_base: PathBuf,
}

fn default_id_prefix() -> String {
    "BUG".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_worktree_base() -> PathBuf {
    PathBuf::from("/tmp/bughunt")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: None,
            subdir: None,
            id_prefix: default_id_prefix(),
            state_dir: default_state_dir(),
            worktree_base: default_worktree_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub fix_strategy: FixStrategy,
    #[serde(default = "default_max_review_attempts")]
    pub max_review_attempts: u32,
    /// Extra attempts when the agent returns no structured result.
    #[serde(default = "default_max_output_retries")]
    pub max_output_retries: u32,
    /// Consecutive failed phases before the run stops as stalled.
    #[serde(default = "default_max_stalled_passes")]
    pub max_stalled_passes: u32,
}

fn default_max_review_attempts() -> u32 {
    3
}

fn default_max_output_retries() -> u32 {
    2
}

fn default_max_stalled_passes() -> u32 {
    3
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            fix_strategy: FixStrategy::default(),
            max_review_attempts: default_max_review_attempts(),
            max_output_retries: default_max_output_retries(),
            max_stalled_passes: default_max_stalled_passes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSection {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub skip_permissions: bool,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_classify_model")]
    pub classify_model: String,
    #[serde(default = "default_tdd_model")]
    pub tdd_model: String,
    #[serde(default = "default_read_tools")]
    pub read_tools: Vec<String>,
    #[serde(default = "default_write_tools")]
    pub write_tools: Vec<String>,
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_classify_model() -> String {
    "haiku".to_string()
}

fn default_tdd_model() -> String {
    "opus".to_string()
}

fn default_read_tools() -> Vec<String> {
    ["Read", "Bash", "Glob", "Grep"].map(String::from).to_vec()
}

fn default_write_tools() -> Vec<String> {
    ["Read", "Bash", "Glob", "Grep", "Skill", "Write", "Edit"]
        .map(String::from)
        .to_vec()
}

impl Default for ClaudeSection {
    fn default() -> Self {
        Self {
            cmd: None,
            skip_permissions: false,
            default_model: default_model(),
            classify_model: default_classify_model(),
            tdd_model: default_tdd_model(),
            read_tools: default_read_tools(),
            write_tools: default_write_tools(),
        }
    }
}

/// The complete bughunt.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HuntToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub claude: ClaudeSection,
}

impl HuntToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse bughunt.toml")
    }

    /// Load `<config_dir>/bughunt.toml`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize bughunt.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Values that parse but make no sense at runtime.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pipeline.max_review_attempts == 0 {
            warnings.push(
                "max_review_attempts is 0: every review rejection ends the fix loop immediately"
                    .to_string(),
            );
        }
        if self.pipeline.max_stalled_passes == 0 {
            warnings.push("max_stalled_passes is 0: treated as 1".to_string());
        }
        let valid_prefix = self
            .project
            .id_prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .project
                .id_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_prefix {
            warnings.push(format!(
                "Invalid id_prefix '{}': must start with a letter and contain only letters, digits or '_'",
                self.project.id_prefix
            ));
        }
        if self.claude.read_tools.is_empty() {
            warnings.push("read_tools is empty: the agent cannot inspect the code".to_string());
        }
        warnings
    }
}

/// Flags that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub name: Option<String>,
    pub subdir: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub strategy: Option<FixStrategy>,
    pub verbose: bool,
}

/// Fully resolved runtime configuration for one project.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub project_name: String,
    pub subdir: Option<String>,
    pub id_prefix: String,
    /// `<state_dir>/<project_name>`
    pub state_dir: PathBuf,
    pub worktree_base: PathBuf,
    pub fix_strategy: FixStrategy,
    pub max_review_attempts: u32,
    pub max_output_retries: u32,
    pub max_stalled_passes: u32,
    pub claude_cmd: String,
    pub skip_permissions: bool,
    pub default_model: String,
    pub classify_model: String,
    pub tdd_model: String,
    pub read_tools: Vec<String>,
    pub write_tools: Vec<String>,
    pub verbose: bool,
    pub toml: HuntToml,
}

impl Config {
    /// Resolve configuration for `project_dir` from the real environment.
    pub fn new(project_dir: &Path, cli: CliOverrides) -> Result<Self> {
        Self::resolve(project_dir, cli, |key| std::env::var(key).ok())
    }

    /// Layering: file, then `env`, then `cli`.
    pub fn resolve(
        project_dir: &Path,
        cli: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| {
                format!("Failed to resolve project directory: {}", project_dir.display())
            })?;
        let toml = HuntToml::load_or_default(&project_dir.join(CONFIG_DIR))?;

        let project_name = cli
            .name
            .or_else(|| toml.project.name.clone())
            .or_else(|| {
                project_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "project".to_string());

        let state_root = cli
            .state_dir
            .or_else(|| env("BUGHUNT_STATE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| toml.project.state_dir.clone());
        let state_root = if state_root.is_absolute() {
            state_root
        } else {
            std::env::current_dir()
                .context("Failed to read working directory")?
                .join(state_root)
        };

        let claude_cmd = env("CLAUDE_CMD")
            .or_else(|| toml.claude.cmd.clone())
            .unwrap_or_else(|| "claude".to_string());
        let skip_permissions = env("SKIP_PERMISSIONS")
            .map(|v| v != "false")
            .unwrap_or(toml.claude.skip_permissions);

        Ok(Self {
            state_dir: state_root.join(&project_name),
            project_name,
            subdir: cli.subdir.or_else(|| toml.project.subdir.clone()),
            id_prefix: toml.project.id_prefix.clone(),
            worktree_base: toml.project.worktree_base.clone(),
            fix_strategy: cli.strategy.unwrap_or(toml.pipeline.fix_strategy),
            max_review_attempts: toml.pipeline.max_review_attempts,
            max_output_retries: toml.pipeline.max_output_retries,
            max_stalled_passes: toml.pipeline.max_stalled_passes.max(1),
            claude_cmd,
            skip_permissions,
            default_model: toml.claude.default_model.clone(),
            classify_model: toml.claude.classify_model.clone(),
            tdd_model: toml.claude.tdd_model.clone(),
            read_tools: toml.claude.read_tools.clone(),
            write_tools: toml.claude.write_tools.clone(),
            verbose: cli.verbose,
            project_dir,
            toml,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(self.log_dir()).context("Failed to create log directory")?;
        Ok(())
    }

    /// Directory the agent works in for an item's worktree.
    pub fn agent_dir(&self, worktree: &Path) -> PathBuf {
        match &self.subdir {
            Some(sub) => worktree.join(sub),
            None => worktree.to_path_buf(),
        }
    }

    /// Directory the agent explores from when no worktree is involved.
    pub fn source_dir(&self) -> PathBuf {
        self.agent_dir(&self.project_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_empty_toml_gives_defaults() {
        let cfg = HuntToml::parse("").unwrap();
        assert_eq!(cfg.project.id_prefix, "BUG");
        assert_eq!(cfg.pipeline.fix_strategy, FixStrategy::Staged);
        assert_eq!(cfg.pipeline.max_review_attempts, 3);
        assert_eq!(cfg.pipeline.max_output_retries, 2);
        assert_eq!(cfg.claude.classify_model, "haiku");
        assert_eq!(cfg.claude.read_tools, vec!["Read", "Bash", "Glob", "Grep"]);
        assert!(cfg.claude.write_tools.contains(&"Edit".to_string()));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn test_parse_full_toml() {
        let cfg = HuntToml::parse(
            r#"
            [project]
            name = "payments"
            subdir = "services/api"
            id_prefix = "PAY"

            [pipeline]
            fix_strategy = "tdd"
            max_review_attempts = 5

            [claude]
            cmd = "/opt/claude"
            tdd_model = "sonnet"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.project.name.as_deref(), Some("payments"));
        assert_eq!(cfg.project.id_prefix, "PAY");
        assert_eq!(cfg.pipeline.fix_strategy, FixStrategy::Tdd);
        assert_eq!(cfg.pipeline.max_review_attempts, 5);
        assert_eq!(cfg.pipeline.max_stalled_passes, 3);
        assert_eq!(cfg.claude.cmd.as_deref(), Some("/opt/claude"));
    }

    #[test]
    fn test_parse_rejects_unknown_strategy() {
        assert!(HuntToml::parse("[pipeline]\nfix_strategy = \"yolo\"").is_err());
        assert!("yolo".parse::<FixStrategy>().is_err());
        assert_eq!("TDD".parse::<FixStrategy>().unwrap(), FixStrategy::Tdd);
    }

    #[test]
    fn test_validate_warnings() {
        let mut cfg = HuntToml::default();
        cfg.pipeline.max_review_attempts = 0;
        cfg.project.id_prefix = "9x".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("id_prefix"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut cfg = HuntToml::default();
        cfg.pipeline.fix_strategy = FixStrategy::Tdd;
        let path = dir.path().join(CONFIG_FILE);
        cfg.save(&path).unwrap();
        let loaded = HuntToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.pipeline.fix_strategy, FixStrategy::Tdd);
    }

    #[test]
    fn test_resolve_layers_file_env_cli() {
        let project = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::create_dir_all(project.path().join(CONFIG_DIR)).unwrap();
        fs::write(
            project.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[project]\nname = \"from-file\"\n[claude]\ncmd = \"file-claude\"\n",
        )
        .unwrap();

        let env: HashMap<&str, String> = [
            ("CLAUDE_CMD", "env-claude".to_string()),
            ("SKIP_PERMISSIONS", "true".to_string()),
            ("BUGHUNT_STATE_DIR", state.path().display().to_string()),
        ]
        .into();
        let cli = CliOverrides {
            name: Some("from-cli".into()),
            strategy: Some(FixStrategy::Tdd),
            ..CliOverrides::default()
        };

        let cfg = Config::resolve(project.path(), cli, |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.project_name, "from-cli");
        assert_eq!(cfg.claude_cmd, "env-claude");
        assert!(cfg.skip_permissions);
        assert_eq!(cfg.fix_strategy, FixStrategy::Tdd);
        assert_eq!(cfg.state_dir, state.path().join("from-cli"));
    }

    #[test]
    fn test_resolve_defaults_name_to_directory() {
        let project = tempdir().unwrap();
        let state = tempdir().unwrap();
        let cli = CliOverrides {
            state_dir: Some(state.path().to_path_buf()),
            ..CliOverrides::default()
        };
        let cfg = Config::resolve(project.path(), cli, no_env).unwrap();
        let dir_name = project
            .path()
            .canonicalize()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert_eq!(cfg.project_name, dir_name);
        assert_eq!(cfg.claude_cmd, "claude");
        assert!(!cfg.skip_permissions);
        cfg.ensure_directories().unwrap();
        assert!(cfg.log_dir().exists());
    }

    #[test]
    fn test_agent_dir_applies_subdir() {
        let project = tempdir().unwrap();
        let cli = CliOverrides {
            subdir: Some("backend".into()),
            state_dir: Some(project.path().join("state")),
            ..CliOverrides::default()
        };
        let cfg = Config::resolve(project.path(), cli, no_env).unwrap();
        assert_eq!(
            cfg.agent_dir(Path::new("/tmp/bughunt/x/bug-001")),
            PathBuf::from("/tmp/bughunt/x/bug-001/backend")
        );
    }
}
