//! Durable run checkpoints.
//!
//! A run is addressed by its run id. The pointer file names the active run;
//! the SQLite snapshot store keeps the latest state and next-phase pointer for
//! every run id it has seen. The pointer is only cleared when a run ends
//! normally, so a crash, stall or Ctrl-C leaves a resumable run behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::router::Phase;
use crate::errors::CheckpointError;
use crate::tracking::HuntState;

/// State and routing position captured at a phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: HuntState,
    /// Phase to run next; `None` once the pipeline has terminated.
    pub next_phase: Option<Phase>,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(state: HuntState, next_phase: Option<Phase>) -> Self {
        Self {
            state,
            next_phase,
            saved_at: Utc::now(),
        }
    }
}

/// Where the project's checkpointed run stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// No pointer, or a pointer whose snapshot is gone.
    None,
    /// Interrupted run that can be resumed.
    Active { run_id: String },
    /// The run reached termination but its pointer was never cleared.
    Completed { run_id: String },
}

/// How to treat an incomplete run found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    #[default]
    Ask,
    Always,
    Never,
}

/// The decision taken at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStart {
    Resume { run_id: String, snapshot: Snapshot },
    Fresh { run_id: String },
}

impl RunStart {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Resume { run_id, .. } | Self::Fresh { run_id } => run_id,
        }
    }
}

/// `run-YYYYMMDD-HHMMSS-xxxx`: second resolution plus a random suffix so two
/// starts in the same second never collide.
pub fn generate_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..4])
}

pub struct CheckpointDb {
    conn: Connection,
}

impl CheckpointDb {
    pub fn new(path: &Path) -> Result<Self, CheckpointError> {
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self, CheckpointError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<(), CheckpointError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT PRIMARY KEY,
                next_phase TEXT,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn save(&self, run_id: &str, snapshot: &Snapshot) -> Result<(), CheckpointError> {
        let body = serde_json::to_string(snapshot).map_err(|source| CheckpointError::Corrupt {
            run_id: run_id.to_string(),
            source,
        })?;
        self.conn.execute(
            "INSERT INTO checkpoints (run_id, next_phase, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
                next_phase = excluded.next_phase,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at",
            params![
                run_id,
                snapshot.next_phase.map(|p| p.as_str()),
                body,
                snapshot.saved_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<Snapshot>, CheckpointError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM checkpoints WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|text| {
            serde_json::from_str(&text).map_err(|source| CheckpointError::Corrupt {
                run_id: run_id.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Async handle to the snapshot store. SQLite work runs on the blocking pool.
#[derive(Clone)]
pub struct CheckpointHandle {
    inner: Arc<Mutex<CheckpointDb>>,
}

impl CheckpointHandle {
    pub fn new(db: CheckpointDb) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn call<F, R>(&self, f: F) -> Result<R, CheckpointError>
    where
        F: FnOnce(&CheckpointDb) -> Result<R, CheckpointError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| CheckpointError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|_| CheckpointError::TaskPanicked)?
    }
}

/// Pointer file plus snapshot store for one project.
#[derive(Clone)]
pub struct CheckpointManager {
    pointer_path: PathBuf,
    db: CheckpointHandle,
}

impl CheckpointManager {
    pub fn open(pointer_path: PathBuf, db_path: &Path) -> Result<Self, CheckpointError> {
        Ok(Self::with_db(pointer_path, CheckpointDb::new(db_path)?))
    }

    pub fn with_db(pointer_path: PathBuf, db: CheckpointDb) -> Self {
        Self {
            pointer_path,
            db: CheckpointHandle::new(db),
        }
    }

    pub fn read_pointer(&self) -> Result<Option<String>, CheckpointError> {
        match fs::read_to_string(&self.pointer_path) {
            Ok(text) => {
                let token = text.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::Pointer(e)),
        }
    }

    pub fn write_pointer(&self, run_id: &str) -> Result<(), CheckpointError> {
        fs::write(&self.pointer_path, run_id).map_err(CheckpointError::Pointer)
    }

    pub fn clear_pointer(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.pointer_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Pointer(e)),
        }
    }

    pub async fn save(&self, run_id: &str, snapshot: Snapshot) -> Result<(), CheckpointError> {
        let run_id = run_id.to_string();
        self.db.call(move |db| db.save(&run_id, &snapshot)).await
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<Snapshot>, CheckpointError> {
        let run_id = run_id.to_string();
        self.db.call(move |db| db.load(&run_id)).await
    }

    pub async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        let run_id = run_id.to_string();
        self.db.call(move |db| db.exists(&run_id)).await
    }

    /// Like [`Self::load`], but a snapshot that no longer deserializes reads
    /// as absent so the caller starts fresh instead of failing.
    async fn load_usable(&self, run_id: &str) -> Result<Option<Snapshot>, CheckpointError> {
        match self.load(run_id).await {
            Err(CheckpointError::Corrupt { run_id, source }) => {
                warn!(run_id = %run_id, error = %source, "Ignoring unreadable checkpoint");
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn status(&self) -> Result<RunStatus, CheckpointError> {
        let Some(run_id) = self.read_pointer()? else {
            return Ok(RunStatus::None);
        };
        Ok(match self.load_usable(&run_id).await? {
            None => RunStatus::None,
            Some(snap) if snap.next_phase.is_none() => RunStatus::Completed { run_id },
            Some(_) => RunStatus::Active { run_id },
        })
    }

    /// Run id of an interrupted run with a usable snapshot, if any.
    pub async fn check_for_incomplete_run(&self) -> Result<Option<String>, CheckpointError> {
        Ok(match self.status().await? {
            RunStatus::Active { run_id } => Some(run_id),
            RunStatus::None | RunStatus::Completed { .. } => None,
        })
    }

    /// Decide between resuming and starting fresh, then persist the chosen
    /// run id as the active pointer. `confirm` is only consulted under
    /// [`ResumePolicy::Ask`] and only when an incomplete run exists.
    pub async fn begin(
        &self,
        policy: ResumePolicy,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<RunStart, CheckpointError> {
        let start = match self.check_for_incomplete_run().await? {
            Some(run_id) => {
                let resume = match policy {
                    ResumePolicy::Always => true,
                    ResumePolicy::Never => false,
                    ResumePolicy::Ask => confirm(&run_id),
                };
                match (resume, self.load_usable(&run_id).await?) {
                    (true, Some(snapshot)) => {
                        info!(run_id = %run_id, "Resuming run");
                        RunStart::Resume { run_id, snapshot }
                    }
                    _ => RunStart::Fresh {
                        run_id: generate_run_id(),
                    },
                }
            }
            None => RunStart::Fresh {
                run_id: generate_run_id(),
            },
        };
        if let RunStart::Fresh { run_id } = &start {
            info!(run_id = %run_id, "Starting fresh run");
        }
        self.write_pointer(start.run_id())?;
        debug!(pointer = %self.pointer_path.display(), "Run pointer written");
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{Severity, StateUpdate, WorkItem, WorkItemId};
    use anyhow::Result;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> CheckpointManager {
        CheckpointManager::with_db(
            dir.join("current_run.txt"),
            CheckpointDb::new_in_memory().unwrap(),
        )
    }

    fn sample_state() -> HuntState {
        let mut state = HuntState::default();
        state.apply(
            StateUpdate::message("Found 1 bug")
                .with_item(WorkItem::new(
                    WorkItemId::new("BUG", 1),
                    "race in cache",
                    Severity::High,
                    vec!["cache.rs".into()],
                ))
                .with_queue(vec!["b.go".into()]),
        );
        state
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let re = regex::Regex::new(r"^run-\d{8}-\d{6}-[0-9a-f]{4}$").unwrap();
        assert!(re.is_match(&id), "unexpected run id {id}");
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_db_save_load_exists() -> Result<()> {
        let db = CheckpointDb::new_in_memory()?;
        assert!(!db.exists("run-a")?);
        assert_eq!(db.load("run-a")?, None);

        let snap = Snapshot::new(sample_state(), Some(Phase::Classify));
        db.save("run-a", &snap)?;
        assert!(db.exists("run-a")?);
        assert_eq!(db.load("run-a")?, Some(snap));

        let later = Snapshot::new(HuntState::default(), None);
        db.save("run-a", &later)?;
        assert_eq!(db.load("run-a")?, Some(later));
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_returns_identical_state() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("checkpoints.db");
        let snap = Snapshot::new(sample_state(), Some(Phase::Scout));
        {
            let mgr = CheckpointManager::open(dir.path().join("current_run.txt"), &db_path)?;
            mgr.write_pointer("run-R")?;
            mgr.save("run-R", snap.clone()).await?;
        }

        let mgr = CheckpointManager::open(dir.path().join("current_run.txt"), &db_path)?;
        let start = mgr.begin(ResumePolicy::Always, |_| false).await?;
        match start {
            RunStart::Resume { run_id, snapshot } => {
                assert_eq!(run_id, "run-R");
                assert_eq!(snapshot, snap);
            }
            other => panic!("expected resume, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_pointer_without_snapshot_starts_fresh_without_prompt() -> Result<()> {
        let dir = tempdir()?;
        let mgr = manager(dir.path());
        mgr.write_pointer("run-20240101-000000")?;

        assert_eq!(mgr.check_for_incomplete_run().await?, None);
        let start = mgr
            .begin(ResumePolicy::Ask, |_| panic!("must not prompt"))
            .await?;
        assert!(matches!(start, RunStart::Fresh { .. }));
        assert_ne!(start.run_id(), "run-20240101-000000");
        assert_eq!(mgr.read_pointer()?.as_deref(), Some(start.run_id()));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_starts_fresh_without_prompt() -> Result<()> {
        let dir = tempdir()?;
        let db = CheckpointDb::new_in_memory()?;
        db.conn.execute(
            "INSERT INTO checkpoints (run_id, next_phase, snapshot, updated_at)
             VALUES ('run-x', 'scout', '{\"bogus\":1}', 'now')",
            [],
        )?;
        let mgr = CheckpointManager::with_db(dir.path().join("current_run.txt"), db);
        mgr.write_pointer("run-x")?;

        assert_eq!(mgr.status().await?, RunStatus::None);
        let start = mgr
            .begin(ResumePolicy::Ask, |_| panic!("must not prompt"))
            .await?;
        assert!(matches!(start, RunStart::Fresh { .. }));
        assert_ne!(start.run_id(), "run-x");
        assert_eq!(mgr.read_pointer()?.as_deref(), Some(start.run_id()));
        Ok(())
    }

    #[tokio::test]
    async fn test_declined_resume_starts_fresh() -> Result<()> {
        let dir = tempdir()?;
        let mgr = manager(dir.path());
        mgr.write_pointer("run-old")?;
        mgr.save("run-old", Snapshot::new(sample_state(), Some(Phase::Classify)))
            .await?;

        let mut asked = None;
        let start = mgr
            .begin(ResumePolicy::Ask, |id| {
                asked = Some(id.to_string());
                false
            })
            .await?;
        assert_eq!(asked.as_deref(), Some("run-old"));
        assert!(matches!(start, RunStart::Fresh { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_transitions() -> Result<()> {
        let dir = tempdir()?;
        let mgr = manager(dir.path());
        assert_eq!(mgr.status().await?, RunStatus::None);

        mgr.write_pointer("run-x")?;
        mgr.save("run-x", Snapshot::new(HuntState::default(), Some(Phase::Scout)))
            .await?;
        assert_eq!(
            mgr.status().await?,
            RunStatus::Active {
                run_id: "run-x".into()
            }
        );

        mgr.save("run-x", Snapshot::new(HuntState::default(), None))
            .await?;
        assert!(matches!(mgr.status().await?, RunStatus::Completed { .. }));

        mgr.clear_pointer()?;
        mgr.clear_pointer()?;
        assert_eq!(mgr.status().await?, RunStatus::None);
        Ok(())
    }
}
