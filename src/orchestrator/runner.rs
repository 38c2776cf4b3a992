//! The run loop.
//!
//! Each pass executes one phase, merges its update, flushes the documents and
//! saves a snapshot holding the next phase. The loop ends when the router has
//! nowhere to go, when too many phases fail in a row, or on cancellation.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use super::checkpoint::{CheckpointManager, RunStart, Snapshot};
use super::phases::{PhaseExecutor, PhaseStatus};
use super::router::{self, Phase};
use crate::config::Config;
use crate::errors::RunError;
use crate::tracking::{FixStatus, HuntState, ItemStore};
use crate::ui::HuntUI;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The router ran out of work. The run pointer is cleared.
    Completed,
    /// `passes` phases failed back to back, the last one being `phase`.
    /// The run pointer is kept so the next invocation can resume.
    Stalled { phase: Phase, passes: u32 },
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub phases_run: u32,
    pub state: HuntState,
}

impl RunSummary {
    /// One line per rejected fix that ran out of review attempts.
    pub fn needs_attention(&self) -> Vec<String> {
        self.state
            .fixes
            .values()
            .filter(|fix| fix.status == FixStatus::Rejected)
            .filter_map(|fix| {
                fix.manual_adjustments
                    .as_ref()
                    .map(|note| format!("{}: {note}", fix.item_id))
            })
            .collect()
    }
}

/// State and routing position carried between phases.
struct Cursor {
    state: HuntState,
    next: Option<Phase>,
    phases_run: u32,
}

pub struct HuntRunner<'a> {
    config: &'a Config,
    store: &'a ItemStore,
    checkpoints: &'a CheckpointManager,
    executor: PhaseExecutor<'a>,
    ui: Option<Arc<HuntUI>>,
}

impl<'a> HuntRunner<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a ItemStore,
        checkpoints: &'a CheckpointManager,
        executor: PhaseExecutor<'a>,
        ui: Option<Arc<HuntUI>>,
    ) -> Self {
        Self {
            config,
            store,
            checkpoints,
            executor,
            ui,
        }
    }

    /// Drive the run until it ends or Ctrl-C is pressed.
    pub async fn run(&self, start: RunStart) -> Result<RunSummary, RunError> {
        self.run_until(start, async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler: never cancel.
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Drive the run until it ends or `shutdown` resolves.
    pub async fn run_until(
        &self,
        start: RunStart,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, RunError> {
        let (run_id, mut cursor) = match start {
            RunStart::Resume { run_id, snapshot } => {
                let cursor = Cursor {
                    next: snapshot.next_phase,
                    state: snapshot.state,
                    phases_run: 0,
                };
                (run_id, cursor)
            }
            RunStart::Fresh { run_id } => {
                let state = self.store.load_initial_state()?;
                let cursor = Cursor {
                    next: Some(router::route(&state)),
                    state,
                    phases_run: 0,
                };
                self.checkpoints
                    .save(&run_id, Snapshot::new(cursor.state.clone(), cursor.next))
                    .await?;
                (run_id, cursor)
            }
        };
        info!(run_id = %run_id, next = ?cursor.next, "Run started");

        let result = tokio::select! {
            biased;
            _ = shutdown => Err(RunError::Cancelled),
            outcome = self.drive(&run_id, &mut cursor) => outcome,
        };

        let flushed = self.flush(&run_id, &cursor).await;
        let outcome = match (result, flushed) {
            (Err(e), Ok(())) => {
                warn!(run_id = %run_id, error = %e, "Run interrupted, pointer kept");
                return Err(e);
            }
            (Err(e), Err(flush_err)) => {
                warn!(run_id = %run_id, error = %e, "Run interrupted, pointer kept");
                warn!(run_id = %run_id, error = %flush_err, "Failed to save state on exit");
                return Err(flush_err);
            }
            (Ok(_), Err(e)) => return Err(e),
            (Ok(outcome), Ok(())) => outcome,
        };

        match &outcome {
            RunOutcome::Completed => {
                self.checkpoints.clear_pointer()?;
                info!(run_id = %run_id, phases = cursor.phases_run, "Run completed");
            }
            RunOutcome::Stalled { phase, passes } => {
                warn!(run_id = %run_id, phase = %phase, passes, "Run stalled, pointer kept");
            }
        }
        Ok(RunSummary {
            run_id,
            outcome,
            phases_run: cursor.phases_run,
            state: cursor.state,
        })
    }

    async fn drive(&self, run_id: &str, cursor: &mut Cursor) -> Result<RunOutcome, RunError> {
        let mut failed_in_a_row = 0;
        while let Some(phase) = cursor.next {
            if let Some(ui) = &self.ui {
                ui.start_phase(phase);
            }
            let report = self.executor.execute(phase, &cursor.state).await?;
            if let Some(ui) = &self.ui {
                ui.phase_finished(&report);
            }

            let status = report.status;
            cursor.state.apply(report.update);
            cursor.phases_run += 1;
            // Fixed edges only follow a phase that did its work.
            cursor.next = match status {
                PhaseStatus::Completed => router::next_after(
                    &cursor.state,
                    phase,
                    self.config.fix_strategy,
                    self.config.max_review_attempts,
                ),
                PhaseStatus::Skipped | PhaseStatus::Failed => Some(router::route(&cursor.state)),
            };
            failed_in_a_row = match status {
                PhaseStatus::Failed => failed_in_a_row + 1,
                _ => 0,
            };

            self.store.persist(&cursor.state)?;
            self.checkpoints
                .save(run_id, Snapshot::new(cursor.state.clone(), cursor.next))
                .await?;

            if failed_in_a_row >= self.config.max_stalled_passes {
                return Ok(RunOutcome::Stalled {
                    phase,
                    passes: failed_in_a_row,
                });
            }
        }
        Ok(RunOutcome::Completed)
    }

    async fn flush(&self, run_id: &str, cursor: &Cursor) -> Result<(), RunError> {
        self.store.persist(&cursor.state)?;
        self.checkpoints
            .save(run_id, Snapshot::new(cursor.state.clone(), cursor.next))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliOverrides, FixStrategy};
    use crate::gateway::testing::ScriptedGateway;
    use crate::orchestrator::checkpoint::RunStatus;
    use crate::tracking::{
        ItemStatus, ReproApproach, Severity, StateUpdate, WorkItem, WorkItemId,
    };
    use crate::workspace::Workspace;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    struct FixedWorkspace(PathBuf);

    #[async_trait]
    impl Workspace for FixedWorkspace {
        async fn ensure_worktree(&self, _id: &WorkItemId) -> Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: Config,
        store: ItemStore,
        checkpoints: CheckpointManager,
        workspace: FixedWorkspace,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = tempdir()?;
            let project = dir.path().join("shop");
            std::fs::create_dir_all(&project)?;
            let mut config = Config::resolve(
                &project,
                CliOverrides {
                    state_dir: Some(dir.path().join("state")),
                    strategy: Some(FixStrategy::Staged),
                    ..Default::default()
                },
                |_| None,
            )?;
            config.max_output_retries = 0;
            config.max_review_attempts = 2;
            config.max_stalled_passes = 2;
            let store = ItemStore::open(&config.state_dir)?;
            let checkpoints =
                CheckpointManager::open(store.pointer_path(), &store.checkpoint_db_path())?;
            let workspace = FixedWorkspace(project.clone());
            Ok(Self {
                _dir: dir,
                config,
                store,
                checkpoints,
                workspace,
            })
        }

        fn runner<'a>(&'a self, gateway: &'a ScriptedGateway) -> HuntRunner<'a> {
            let executor = PhaseExecutor::new(&self.config, &self.store, gateway, &self.workspace);
            HuntRunner::new(&self.config, &self.store, &self.checkpoints, executor, None)
        }

        /// Put a non-empty directory where the items document goes so
        /// every later persist fails.
        fn break_items_document(&self) -> Result<()> {
            let path = self.store.root().join("items.json");
            std::fs::create_dir_all(&path)?;
            std::fs::write(path.join("keep"), "x")?;
            Ok(())
        }

        fn seed(&self, item: WorkItem) -> Result<()> {
            let mut state = self.store.load_initial_state()?;
            state.apply(StateUpdate::default().with_item(item));
            self.store.persist(&state)?;
            Ok(())
        }
    }

    fn ready_item() -> WorkItem {
        let mut item = WorkItem::new(
            WorkItemId::new("BUG", 1),
            "crash on empty cart",
            Severity::High,
            vec![],
        )
        .with_status(ItemStatus::PreparedForFix);
        item.reproducibility_approach = Some(ReproApproach::UnitTest);
        item
    }

    fn fix_ready() -> serde_json::Value {
        json!({"status": "READY_FOR_REVIEW", "fix_description": "guard", "notes": ""})
    }

    fn refactored() -> serde_json::Value {
        json!({"refactored": true, "notes": "tidied"})
    }

    #[tokio::test]
    async fn test_fix_loop_ends_after_solved_review() -> Result<()> {
        let fx = Fixture::new()?;
        fx.seed(ready_item())?;
        let gateway = ScriptedGateway::new()
            .respond(fix_ready())
            .respond(refactored())
            .respond(json!({"status": "SOLVED", "notes": "ok"}));

        let summary = fx
            .runner(&gateway)
            .run_until(RunStart::Fresh { run_id: "run-a".into() }, std::future::pending())
            .await?;

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.phases_run, 3);
        let id = WorkItemId::new("BUG", 1);
        assert_eq!(summary.state.items[&id].status, ItemStatus::Solved);
        assert_eq!(summary.state.fixes[&id].status, FixStatus::Finished);

        let persisted = fx.store.load_initial_state()?;
        assert_eq!(persisted.items[&id].status, ItemStatus::Solved);
        assert_eq!(fx.checkpoints.read_pointer()?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejections_stop_at_max_review_attempts() -> Result<()> {
        let fx = Fixture::new()?;
        fx.seed(ready_item())?;
        let reject =
            json!({"status": "PREPARED_FOR_FIX", "rejection_reason": "not yet", "notes": ""});
        let gateway = ScriptedGateway::new()
            .respond(fix_ready())
            .respond(refactored())
            .respond(reject.clone())
            .respond(fix_ready())
            .respond(refactored())
            .respond(reject);

        let summary = fx
            .runner(&gateway)
            .run_until(RunStart::Fresh { run_id: "run-b".into() }, std::future::pending())
            .await?;

        assert_eq!(summary.outcome, RunOutcome::Completed);
        let fix = &summary.state.fixes[&WorkItemId::new("BUG", 1)];
        assert_eq!(fix.status, FixStatus::Rejected);
        assert_eq!(fix.review_attempts, 2);
        assert_eq!(gateway.remaining(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_failures_stall_and_keep_pointer() -> Result<()> {
        let fx = Fixture::new()?;
        let gateway = ScriptedGateway::new();
        fx.checkpoints.write_pointer("run-c")?;

        let summary = fx
            .runner(&gateway)
            .run_until(RunStart::Fresh { run_id: "run-c".into() }, std::future::pending())
            .await?;

        assert_eq!(
            summary.outcome,
            RunOutcome::Stalled {
                phase: Phase::SuggestEntrypoints,
                passes: 2
            }
        );
        assert_eq!(gateway.call_count(), 2);
        assert_eq!(
            fx.checkpoints.status().await?,
            RunStatus::Active {
                run_id: "run-c".into()
            }
        );
        let snapshot = fx.checkpoints.load("run-c").await?;
        assert_eq!(
            snapshot.and_then(|s| s.next_phase),
            Some(Phase::SuggestEntrypoints)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_flushes_and_keeps_pointer() -> Result<()> {
        let fx = Fixture::new()?;
        fx.seed(ready_item())?;
        fx.checkpoints.write_pointer("run-d")?;
        let gateway = ScriptedGateway::new();

        let err = fx
            .runner(&gateway)
            .run_until(RunStart::Fresh { run_id: "run-d".into() }, std::future::ready(()))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(fx.checkpoints.read_pointer()?.as_deref(), Some("run-d"));
        let snapshot = fx.checkpoints.load("run-d").await?;
        assert_eq!(snapshot.and_then(|s| s.next_phase), Some(Phase::Fix));
        Ok(())
    }

    fn review_snapshot() -> Snapshot {
        let mut state = HuntState::default();
        state.apply(
            StateUpdate::default().with_item(ready_item().with_status(ItemStatus::ReadyForReview)),
        );
        Snapshot::new(state, Some(Phase::Review))
    }

    #[tokio::test]
    async fn test_cancellation_reports_failed_save() -> Result<()> {
        let fx = Fixture::new()?;
        fx.break_items_document()?;
        fx.checkpoints.write_pointer("run-f")?;
        let gateway = ScriptedGateway::new();

        let err = fx
            .runner(&gateway)
            .run_until(
                RunStart::Resume {
                    run_id: "run-f".into(),
                    snapshot: review_snapshot(),
                },
                std::future::ready(()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Persistence(_)));
        assert_eq!(fx.checkpoints.read_pointer()?.as_deref(), Some("run-f"));
        Ok(())
    }

    #[tokio::test]
    async fn test_persistence_failure_mid_run_stops_and_keeps_pointer() -> Result<()> {
        let fx = Fixture::new()?;
        fx.break_items_document()?;
        fx.checkpoints.write_pointer("run-g")?;
        let gateway = ScriptedGateway::new().respond(json!({"status": "SOLVED", "notes": ""}));

        let err = fx
            .runner(&gateway)
            .run_until(
                RunStart::Resume {
                    run_id: "run-g".into(),
                    snapshot: review_snapshot(),
                },
                std::future::pending(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Persistence(_)));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(fx.checkpoints.read_pointer()?.as_deref(), Some("run-g"));
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_continues_from_snapshot_phase() -> Result<()> {
        let fx = Fixture::new()?;
        let mut state = HuntState::default();
        let mut item = ready_item().with_status(ItemStatus::ReadyForReview);
        item.reproducibility_approach = Some(ReproApproach::UnitTest);
        state.apply(StateUpdate::default().with_item(item));
        let snapshot = Snapshot::new(state, Some(Phase::Review));
        let gateway = ScriptedGateway::new().respond(json!({"status": "SOLVED", "notes": ""}));

        let summary = fx
            .runner(&gateway)
            .run_until(
                RunStart::Resume {
                    run_id: "run-e".into(),
                    snapshot,
                },
                std::future::pending(),
            )
            .await?;

        assert_eq!(summary.phases_run, 1);
        assert_eq!(
            summary.state.items[&WorkItemId::new("BUG", 1)].status,
            ItemStatus::Solved
        );
        Ok(())
    }

    #[test]
    fn test_needs_attention_lists_exhausted_fixes() {
        let id = WorkItemId::new("BUG", 2);
        let mut fix = crate::tracking::Fix::submitted(&id, None).rejected(Some("no".into()));
        fix.manual_adjustments = Some("needs manual adjustment".into());
        let mut state = HuntState::default();
        state.apply(StateUpdate::default().with_fix(fix));
        let summary = RunSummary {
            run_id: "run-f".into(),
            outcome: RunOutcome::Completed,
            phases_run: 0,
            state,
        };
        assert_eq!(
            summary.needs_attention(),
            vec!["BUG-002: needs manual adjustment"]
        );
    }
}
