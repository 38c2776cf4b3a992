//! Per-item git worktrees.
//!
//! Each work item gets its own worktree at `<base>/<id lowercased>` on a new
//! branch of the same name, cut from `origin/<default branch>` after a fetch.
//! An existing worktree directory is reused as is, so a resumed run picks up
//! where the interrupted one left its commits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository,
    WorktreeAddOptions,
};
use tracing::{debug, info};

use crate::tracking::WorkItemId;

/// Provides the directory an item's code-changing phases run in.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn ensure_worktree(&self, id: &WorkItemId) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct GitWorkspace {
    repo_dir: PathBuf,
    base: PathBuf,
}

impl GitWorkspace {
    /// `base` is the directory holding this project's worktrees.
    pub fn new(repo_dir: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            base: base.into(),
        }
    }

    pub fn worktree_path(&self, id: &WorkItemId) -> PathBuf {
        self.base.join(id.to_string().to_lowercase())
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn ensure_worktree(&self, id: &WorkItemId) -> Result<PathBuf> {
        let path = self.worktree_path(id);
        if path.exists() {
            debug!(path = %path.display(), "Reusing existing worktree");
            return Ok(path);
        }
        let repo_dir = self.repo_dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || create_worktree_from_origin(&repo_dir, &target))
            .await
            .context("Worktree task panicked")??;
        info!(item = %id, path = %path.display(), "Created worktree");
        Ok(path)
    }
}

fn fetch_origin(repo: &Repository) -> Result<()> {
    let mut remote = repo
        .find_remote("origin")
        .context("Repository has no 'origin' remote")?;
    let git_config = repo.config().context("Failed to read git config")?;

    let mut attempts = 0;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("authentication failed for origin"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            Cred::credential_helper(&git_config, url, username)
        } else {
            Cred::default()
        }
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    remote
        .fetch(&[] as &[&str], Some(&mut options), None)
        .context("Failed to fetch origin")?;
    Ok(())
}

/// Branch `refs/remotes/origin/HEAD` points at, or `main`.
fn default_branch(repo: &Repository) -> String {
    repo.find_reference("refs/remotes/origin/HEAD")
        .ok()
        .and_then(|r| {
            r.symbolic_target()
                .and_then(|t| t.strip_prefix("refs/remotes/origin/"))
                .map(str::to_string)
        })
        .unwrap_or_else(|| "main".to_string())
}

fn create_worktree_from_origin(repo_dir: &Path, path: &Path) -> Result<()> {
    let repo = Repository::open(repo_dir)
        .with_context(|| format!("Failed to open git repository at {}", repo_dir.display()))?;
    fetch_origin(&repo)?;

    let branch = default_branch(&repo);
    let start = repo
        .find_reference(&format!("refs/remotes/origin/{branch}"))
        .with_context(|| format!("origin/{branch} not found"))?
        .peel_to_commit()
        .context("origin default branch does not point at a commit")?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid worktree path: {}", path.display()))?;

    let local = match repo.find_branch(name, BranchType::Local) {
        Ok(existing) => existing,
        Err(_) => repo
            .branch(name, &start, false)
            .with_context(|| format!("Failed to create branch {name}"))?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut options = WorktreeAddOptions::new();
    options.reference(Some(local.get()));
    repo.worktree(name, path, Some(&options))
        .with_context(|| format!("Failed to add worktree at {}", path.display()))?;
    debug!(branch = name, base = %branch, "Worktree branch created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};
    use tempfile::tempdir;

    fn origin_with_commit(dir: &Path) -> Result<()> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir, &opts)?;
        std::fs::write(dir.join("app.py"), "print('hi')\n")?;
        let mut index = repo.index()?;
        index.add_path(Path::new("app.py"))?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = Signature::now("bughunt", "bughunt@localhost")?;
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])?;
        Ok(())
    }

    #[test]
    fn test_worktree_path_is_lowercased_id() {
        let ws = GitWorkspace::new("/repo", "/tmp/bughunt/shop");
        assert_eq!(
            ws.worktree_path(&WorkItemId::new("BUG", 3)),
            PathBuf::from("/tmp/bughunt/shop/bug-003")
        );
    }

    #[tokio::test]
    async fn test_ensure_worktree_creates_then_reuses() -> Result<()> {
        let origin = tempdir()?;
        origin_with_commit(origin.path())?;
        let clone_dir = tempdir()?;
        let origin_url = origin.path().to_string_lossy().to_string();
        Repository::clone(&origin_url, clone_dir.path())?;

        let base = tempdir()?;
        let ws = GitWorkspace::new(clone_dir.path(), base.path().join("proj"));
        let id = WorkItemId::new("BUG", 1);

        let path = ws.ensure_worktree(&id).await?;
        assert!(path.join("app.py").exists());
        assert!(path.ends_with("bug-001"));

        let repo = Repository::open(clone_dir.path())?;
        assert!(repo.find_branch("bug-001", BranchType::Local).is_ok());

        let again = ws.ensure_worktree(&id).await?;
        assert_eq!(again, path);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_origin_is_error() -> Result<()> {
        let repo_dir = tempdir()?;
        origin_with_commit(repo_dir.path())?;
        let base = tempdir()?;
        let ws = GitWorkspace::new(repo_dir.path(), base.path());
        let err = ws
            .ensure_worktree(&WorkItemId::new("BUG", 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("origin"));
        Ok(())
    }
}
