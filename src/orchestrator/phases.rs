//! One executor per pipeline phase.
//!
//! An executor reads the current [`HuntState`], talks to the agent and the
//! workspace, writes the item's details file and returns a [`PhaseReport`]
//! holding the partial update to merge. Agent silence and workspace errors
//! become a failed report; only details-file I/O is fatal.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use super::router::{Phase, target_for};
use crate::config::{Config, FixStrategy};
use crate::errors::{RunError, StoreError};
use crate::gateway::{AgentGateway, AgentRequest, invoke_structured};
use crate::prompts;
use crate::tdd::{TaskKind, TddConfig, TddResult, TddSettings, TddStatus, TddWorkflow};
use crate::tracking::{
    Fix, FixStatus, HuntState, ItemStatus, ItemStore, ReproApproach, ReproChance, Severity,
    StateUpdate, WorkItem, WorkItemId,
};
use crate::workspace::Workspace;

#[derive(Debug, Deserialize, JsonSchema)]
struct EntrypointsOutput {
    /// Files worth starting a bug search from.
    entrypoints: Vec<String>,
    reasoning: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct Finding {
    short_description: String,
    severity: Severity,
    #[serde(default)]
    relevant_files: Vec<String>,
    details: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ScoutOutput {
    #[serde(default)]
    bugs: Vec<Finding>,
    #[serde(default)]
    exploration_summary: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ClassifyOutput {
    reproducibility_approach: ReproApproach,
    reproducibility_chance: ReproChance,
    reasoning: String,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ReproduceStatus {
    PreparedForFix,
    Discarded,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReproduceOutput {
    status: ReproduceStatus,
    test_file_path: Option<String>,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum FixOutcome {
    ReadyForReview,
    Discarded,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FixOutput {
    status: FixOutcome,
    #[serde(default)]
    fix_description: String,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RefactorOutput {
    refactored: bool,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ReviewVerdict {
    Solved,
    PreparedForFix,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReviewOutput {
    status: ReviewVerdict,
    rejection_reason: Option<String>,
    #[serde(default)]
    notes: String,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Completed,
    /// Nothing to do: no target, or the work is already there.
    Skipped,
    /// Agent silence or a collaborator error. Counts towards the stall guard.
    Failed,
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub target: Option<WorkItemId>,
    pub status: PhaseStatus,
    pub update: StateUpdate,
}

impl PhaseReport {
    fn new(
        phase: Phase,
        target: Option<&WorkItem>,
        status: PhaseStatus,
        update: StateUpdate,
    ) -> Self {
        Self {
            phase,
            target: target.map(|item| item.id.clone()),
            status,
            update,
        }
    }
}

/// Everything a phase needs besides the state it reads.
pub struct PhaseExecutor<'a> {
    config: &'a Config,
    store: &'a ItemStore,
    gateway: &'a dyn AgentGateway,
    workspace: &'a dyn Workspace,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a ItemStore,
        gateway: &'a dyn AgentGateway,
        workspace: &'a dyn Workspace,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            workspace,
        }
    }

    pub async fn execute(&self, phase: Phase, state: &HuntState) -> Result<PhaseReport, RunError> {
        info!(phase = %phase, "Phase started");
        let report = match phase {
            Phase::SuggestEntrypoints => self.suggest_entrypoints(state).await?,
            Phase::Scout => self.scout(state).await?,
            Phase::Classify => self.classify(state).await?,
            Phase::Reproduce => match self.config.fix_strategy {
                FixStrategy::Staged => self.reproduce(state).await?,
                FixStrategy::Tdd => self.reproduce_tdd(state).await?,
            },
            Phase::Fix => self.fix(state).await?,
            Phase::Refactor => self.refactor(state).await?,
            Phase::Review => self.review(state).await?,
        };
        info!(
            phase = %phase,
            status = ?report.status,
            target = ?report.target.as_ref().map(|id| id.to_string()),
            "Phase finished"
        );
        Ok(report)
    }

    async fn ask<T>(
        &self,
        instructions: String,
        tools: &[String],
        cwd: PathBuf,
        model: &str,
    ) -> Result<Option<T>, RunError>
    where
        T: JsonSchema + serde::de::DeserializeOwned,
    {
        let request = AgentRequest::for_output::<T>(instructions, tools, cwd, model)
            .map_err(|e| RunError::Other(e.into()))?;
        Ok(invoke_structured(self.gateway, &request, self.config.max_output_retries).await)
    }

    fn item_json(item: &WorkItem) -> Result<String, StoreError> {
        serde_json::to_string_pretty(item).map_err(|source| StoreError::Serialize {
            what: "work item",
            source,
        })
    }

    fn details(&self, id: &WorkItemId) -> Result<String, StoreError> {
        Ok(self.store.load_details(id)?.unwrap_or_default())
    }

    /// Worktree for `item`, or a failed report when it cannot be prepared.
    async fn worktree(&self, phase: Phase, item: &WorkItem) -> Result<PathBuf, PhaseReport> {
        match self.workspace.ensure_worktree(&item.id).await {
            Ok(path) => Ok(self.config.agent_dir(&path)),
            Err(e) => {
                warn!(item = %item.id, error = %e, "Worktree setup failed");
                Err(PhaseReport::new(
                    phase,
                    Some(item),
                    PhaseStatus::Failed,
                    StateUpdate::message(format!("{} worktree setup failed: {e:#}", item.id)),
                ))
            }
        }
    }

    async fn suggest_entrypoints(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::SuggestEntrypoints;
        if !state.queue.is_empty() {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("Entrypoints already exist."),
            ));
        }
        let output: Option<EntrypointsOutput> = self
            .ask(
                prompts::suggest_entrypoints(),
                &self.config.read_tools,
                self.config.source_dir(),
                &self.config.default_model,
            )
            .await?;
        let report = match output {
            Some(out) if !out.entrypoints.is_empty() => PhaseReport::new(
                phase,
                None,
                PhaseStatus::Completed,
                StateUpdate::message(out.reasoning).with_queue(out.entrypoints),
            ),
            Some(_) => PhaseReport::new(
                phase,
                None,
                PhaseStatus::Failed,
                StateUpdate::message("No entrypoints suggested."),
            ),
            None => {
                warn!("Agent gave no entrypoints");
                PhaseReport::new(
                    phase,
                    None,
                    PhaseStatus::Failed,
                    StateUpdate::message("Failed to suggest entrypoints."),
                )
            }
        };
        Ok(report)
    }

    async fn scout(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Scout;
        let Some((entrypoint, rest)) = state.queue.split_first() else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No entrypoints to scout."),
            ));
        };
        let tracked = serde_json::to_string(&state.items).map_err(|source| StoreError::Serialize {
            what: "tracked items",
            source,
        })?;
        let output: Option<ScoutOutput> = self
            .ask(
                prompts::scout(entrypoint, &tracked),
                &self.config.read_tools,
                self.config.source_dir(),
                &self.config.default_model,
            )
            .await?;

        let update = StateUpdate::default().with_queue(rest.to_vec());
        let Some(out) = output else {
            warn!(entrypoint = %entrypoint, "Scout produced no findings");
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Failed,
                update.with_message("No bugs found."),
            ));
        };
        if out.bugs.is_empty() {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Completed,
                update.with_message("No bugs found."),
            ));
        }

        let mut update = update;
        let mut found = Vec::new();
        for (offset, finding) in out.bugs.into_iter().enumerate() {
            let id = state.next_item_id(&self.config.id_prefix, offset as u32);
            self.store.save_details(&id, &finding.details)?;
            found.push(id.to_string());
            update = update.with_item(WorkItem::new(
                id,
                &finding.short_description,
                finding.severity,
                finding.relevant_files,
            ));
        }
        info!(entrypoint = %entrypoint, found = found.len(), "Scouting finished");
        let mut message = format!("Found {} from {entrypoint}", found.join(", "));
        if !out.exploration_summary.is_empty() {
            message.push_str(&format!(": {}", out.exploration_summary));
        }
        Ok(PhaseReport::new(
            phase,
            None,
            PhaseStatus::Completed,
            update.with_message(message),
        ))
    }

    async fn classify(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Classify;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No potential high severity bugs found."),
            ));
        };
        let details = self.details(&item.id)?;
        let output: Option<ClassifyOutput> = self
            .ask(
                prompts::classify(&Self::item_json(item)?, &details),
                &self.config.read_tools,
                self.config.source_dir(),
                &self.config.classify_model,
            )
            .await?;
        let Some(out) = output else {
            warn!(item = %item.id, "Classification failed");
            return Ok(PhaseReport::new(
                phase,
                Some(item),
                PhaseStatus::Failed,
                StateUpdate::message("Failed to classify bug."),
            ));
        };
        self.store.append_details(
            &item.id,
            &format!("\n\n## Classification Summary\n\n{}", out.reasoning),
        )?;
        let classified = item.classified(out.reproducibility_approach, out.reproducibility_chance);
        let message = format!(
            "{} classified as {}/{}",
            item.id,
            out.reproducibility_approach.as_str(),
            out.reproducibility_chance.as_str()
        );
        Ok(PhaseReport::new(
            phase,
            Some(item),
            PhaseStatus::Completed,
            StateUpdate::message(message).with_item(classified),
        ))
    }

    async fn reproduce(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Reproduce;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No bugs to reproduce."),
            ));
        };
        let dir = match self.worktree(phase, item).await {
            Ok(dir) => dir,
            Err(report) => return Ok(report),
        };
        let details = self.details(&item.id)?;
        let output: Option<ReproduceOutput> = self
            .ask(
                prompts::reproduce(&item.id.to_string(), &Self::item_json(item)?, &details, &dir),
                &self.config.write_tools,
                dir.clone(),
                &self.config.default_model,
            )
            .await?;
        let Some(out) = output else {
            warn!(item = %item.id, "Reproduction failed");
            return Ok(PhaseReport::new(
                phase,
                Some(item),
                PhaseStatus::Failed,
                StateUpdate::message("Failed to reproduce bug."),
            ));
        };

        let mut notes = format!("\n\n## Reproduction Notes\n\n{}", out.notes);
        if let Some(path) = &out.test_file_path {
            notes.push_str(&format!("\nTest file: {path}"));
        }
        self.store.append_details(&item.id, &notes)?;

        let status = match out.status {
            ReproduceStatus::PreparedForFix => ItemStatus::PreparedForFix,
            ReproduceStatus::Discarded => ItemStatus::Discarded,
        };
        Ok(PhaseReport::new(
            phase,
            Some(item),
            PhaseStatus::Completed,
            StateUpdate::message(format!("{} reproduction: {status}", item.id))
                .with_item(item.with_status(status)),
        ))
    }

    /// Reproduce, fix and review in one bounded loop.
    async fn reproduce_tdd(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Reproduce;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No bugs to reproduce."),
            ));
        };
        let dir = match self.worktree(phase, item).await {
            Ok(dir) => dir,
            Err(report) => return Ok(report),
        };
        let task = TddConfig {
            task_id: item.id.to_string(),
            kind: TaskKind::BugFix,
            worktree: dir,
            description: item.short_description.clone(),
            details: self.details(&item.id)?,
            relevant_files: item.relevant_files.clone(),
            max_review_attempts: self.config.max_review_attempts,
        };
        let settings = TddSettings {
            model: self.config.tdd_model.clone(),
            write_tools: self.config.write_tools.clone(),
            read_tools: self.config.read_tools.clone(),
            max_output_retries: self.config.max_output_retries,
        };
        let result = TddWorkflow::new(self.gateway, settings).run(&task).await;

        self.store.append_details(&item.id, &tdd_notes(&result))?;
        let update = self.apply_tdd_result(state, item, &result);
        Ok(PhaseReport::new(phase, Some(item), PhaseStatus::Completed, update))
    }

    fn apply_tdd_result(
        &self,
        state: &HuntState,
        item: &WorkItem,
        result: &TddResult,
    ) -> StateUpdate {
        let previous = state.fix_for(&item.id);
        let message = format!("{} tdd: {}", item.id, result.status.as_str());
        match result.status {
            TddStatus::Success => {
                let fix = Fix {
                    review_attempts: result.review_attempts,
                    ..Fix::submitted(&item.id, previous).finished()
                };
                StateUpdate::message(message)
                    .with_item(item.with_status(ItemStatus::Solved))
                    .with_fix(fix)
            }
            TddStatus::Discarded => {
                StateUpdate::message(message).with_item(item.with_status(ItemStatus::Discarded))
            }
            TddStatus::MaxAttemptsReached => {
                let max = self.config.max_review_attempts;
                warn!(item = %item.id, attempts = max, "Review attempts exhausted");
                let fix = Fix {
                    status: FixStatus::Rejected,
                    rejection_reason: result.rejection_history.last().cloned(),
                    manual_adjustments: Some(format!(
                        "Fix loop exhausted {max} review attempts; needs manual adjustment."
                    )),
                    review_attempts: max,
                    ..Fix::submitted(&item.id, previous)
                };
                StateUpdate::message(format!("{message}, needs manual adjustment"))
                    .with_item(item.with_status(ItemStatus::PreparedForFix))
                    .with_fix(fix)
            }
        }
    }

    async fn fix(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Fix;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No bugs prepared for fix."),
            ));
        };
        let dir = match self.worktree(phase, item).await {
            Ok(dir) => dir,
            Err(report) => return Ok(report),
        };
        let previous = state.fix_for(&item.id);
        let rejection = previous
            .filter(|fix| fix.status == FixStatus::Rejected)
            .and_then(|fix| fix.rejection_reason.as_deref());
        let details = self.details(&item.id)?;
        let output: Option<FixOutput> = self
            .ask(
                prompts::fix(
                    &item.id.to_string(),
                    &Self::item_json(item)?,
                    &details,
                    rejection,
                    &dir,
                ),
                &self.config.write_tools,
                dir.clone(),
                &self.config.default_model,
            )
            .await?;
        let Some(out) = output else {
            warn!(item = %item.id, "Fix failed");
            return Ok(PhaseReport::new(
                phase,
                Some(item),
                PhaseStatus::Failed,
                StateUpdate::message("Failed to fix bug."),
            ));
        };
        self.store.append_details(
            &item.id,
            &format!(
                "\n\n## Fix Notes\n\n{}\n\nFix description: {}",
                out.notes, out.fix_description
            ),
        )?;

        let update = match out.status {
            FixOutcome::ReadyForReview => StateUpdate::default()
                .with_item(item.with_status(ItemStatus::ReadyForReview))
                .with_fix(Fix::submitted(&item.id, previous)),
            FixOutcome::Discarded => {
                StateUpdate::default().with_item(item.with_status(ItemStatus::Discarded))
            }
        };
        let status = match out.status {
            FixOutcome::ReadyForReview => ItemStatus::ReadyForReview,
            FixOutcome::Discarded => ItemStatus::Discarded,
        };
        Ok(PhaseReport::new(
            phase,
            Some(item),
            PhaseStatus::Completed,
            update.with_message(format!("{} fix: {status}", item.id)),
        ))
    }

    async fn refactor(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Refactor;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No fixes to refactor."),
            ));
        };
        let dir = match self.worktree(phase, item).await {
            Ok(dir) => dir,
            Err(report) => return Ok(report),
        };
        let details = self.details(&item.id)?;
        let output: Option<RefactorOutput> = self
            .ask(
                prompts::refactor(&Self::item_json(item)?, &details, &dir),
                &self.config.write_tools,
                dir.clone(),
                &self.config.default_model,
            )
            .await?;
        // Review still runs when cleanup produced nothing.
        let Some(out) = output else {
            return Ok(PhaseReport::new(
                phase,
                Some(item),
                PhaseStatus::Skipped,
                StateUpdate::message("Refactoring completed."),
            ));
        };
        self.store
            .append_details(&item.id, &format!("\n\n## Refactor Notes\n\n{}", out.notes))?;
        Ok(PhaseReport::new(
            phase,
            Some(item),
            PhaseStatus::Completed,
            StateUpdate::message(format!("{} refactored: {}", item.id, out.refactored)),
        ))
    }

    async fn review(&self, state: &HuntState) -> Result<PhaseReport, RunError> {
        let phase = Phase::Review;
        let Some(item) = target_for(state, phase) else {
            return Ok(PhaseReport::new(
                phase,
                None,
                PhaseStatus::Skipped,
                StateUpdate::message("No fixes to review."),
            ));
        };
        let dir = match self.worktree(phase, item).await {
            Ok(dir) => dir,
            Err(report) => return Ok(report),
        };
        let details = self.details(&item.id)?;
        let output: Option<ReviewOutput> = self
            .ask(
                prompts::review(&Self::item_json(item)?, &details, &dir),
                &self.config.read_tools,
                dir.clone(),
                &self.config.default_model,
            )
            .await?;
        let Some(out) = output else {
            warn!(item = %item.id, "Review failed");
            return Ok(PhaseReport::new(
                phase,
                Some(item),
                PhaseStatus::Failed,
                StateUpdate::message("Failed to review fix."),
            ));
        };
        self.store
            .append_details(&item.id, &format!("\n\n## Review Notes\n\n{}", out.notes))?;

        let fix = state
            .fix_for(&item.id)
            .cloned()
            .unwrap_or_else(|| Fix::submitted(&item.id, None));
        let (status, fix) = match out.status {
            ReviewVerdict::Solved => (ItemStatus::Solved, fix.finished()),
            ReviewVerdict::PreparedForFix => {
                let reason = out
                    .rejection_reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(out.notes);
                (ItemStatus::PreparedForFix, fix.rejected(Some(reason)))
            }
        };
        Ok(PhaseReport::new(
            phase,
            Some(item),
            PhaseStatus::Completed,
            StateUpdate::message(format!("{} review: {status}", item.id))
                .with_item(item.with_status(status))
                .with_fix(fix),
        ))
    }
}

fn tdd_notes(result: &TddResult) -> String {
    let mut notes = format!(
        "\n\n## TDD Notes\n\nResult: {}\n{}",
        result.status.as_str(),
        result.notes.trim_start()
    );
    if let Some(path) = &result.test_file_path {
        notes.push_str(&format!("\nTest file: {path}"));
    }
    if !result.rejection_history.is_empty() {
        notes.push_str("\n\nRejection history:");
        for reason in &result.rejection_history {
            notes.push_str(&format!("\n- {reason}"));
        }
    }
    notes
}
