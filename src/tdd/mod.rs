//! Bounded write-tests → implement → refactor → review loop.
//!
//! A rejected review sends the task back to implement with the accumulated
//! feedback. The loop ends on the first accepting review, on a discard from
//! write-tests or implement, or once `max_review_attempts` reviews have been
//! spent. Missing agent output never causes another pass through the loop:
//! silence at write-tests or implement discards the task, silence at refactor
//! skips ahead to review, silence at review ends with the attempts exhausted.

pub mod templates;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateway::{AgentGateway, AgentRequest, invoke_structured};

/// Selects the instruction templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BugFix,
    Feature,
    Refactor,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BugFix => "bug_fix",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bug_fix" | "bugfix" => Ok(Self::BugFix),
            "feature" => Ok(Self::Feature),
            "refactor" => Ok(Self::Refactor),
            _ => anyhow::bail!(
                "Invalid task kind '{}'. Valid values: bug_fix, feature, refactor",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TddStep {
    WriteTests,
    Implement,
    Refactor,
    Review,
}

impl TddStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteTests => "write_tests",
            Self::Implement => "implement",
            Self::Refactor => "refactor",
            Self::Review => "review",
        }
    }
}

/// Descriptor of one task handed to the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TddConfig {
    pub task_id: String,
    pub kind: TaskKind,
    /// Directory the agent works in.
    pub worktree: PathBuf,
    pub description: String,
    pub details: String,
    pub relevant_files: Vec<String>,
    pub max_review_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TddStatus {
    Success,
    Discarded,
    MaxAttemptsReached,
}

impl TddStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Discarded => "DISCARDED",
            Self::MaxAttemptsReached => "MAX_ATTEMPTS_REACHED",
        }
    }
}

impl fmt::Display for TddStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TddResult {
    pub task_id: String,
    pub status: TddStatus,
    pub test_file_path: Option<String>,
    pub notes: String,
    /// Rejection reasons in the order the reviews produced them.
    pub rejection_history: Vec<String>,
    pub review_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WriteTestsStatus {
    PreparedForFix,
    Discarded,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteTestsOutput {
    status: WriteTestsStatus,
    #[serde(default)]
    test_file_path: Option<String>,
    notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ImplementStatus {
    ReadyForReview,
    Discarded,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImplementOutput {
    status: ImplementStatus,
    notes: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RefactorOutput {
    #[allow(dead_code)]
    refactored: bool,
    notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ReviewVerdict {
    Success,
    Rejected,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReviewOutput {
    status: ReviewVerdict,
    #[serde(default)]
    rejection_reason: Option<String>,
    notes: String,
}

/// Agent settings the loop runs with.
#[derive(Debug, Clone)]
pub struct TddSettings {
    pub model: String,
    /// Tools for steps that change code.
    pub write_tools: Vec<String>,
    /// Tools for review.
    pub read_tools: Vec<String>,
    pub max_output_retries: u32,
}

/// Loop bookkeeping between steps.
struct Progress {
    test_file_path: Option<String>,
    notes: String,
    review_attempts: u32,
    rejection_history: Vec<String>,
}

impl Progress {
    fn finish(self, task_id: &str, status: TddStatus) -> TddResult {
        TddResult {
            task_id: task_id.to_string(),
            status,
            test_file_path: self.test_file_path,
            notes: self.notes,
            rejection_history: self.rejection_history,
            review_attempts: self.review_attempts,
        }
    }
}

pub struct TddWorkflow<'a> {
    gateway: &'a dyn AgentGateway,
    settings: TddSettings,
}

impl<'a> TddWorkflow<'a> {
    pub fn new(gateway: &'a dyn AgentGateway, settings: TddSettings) -> Self {
        Self { gateway, settings }
    }

    /// Drive one task to a terminal status.
    pub async fn run(&self, config: &TddConfig) -> TddResult {
        let mut progress = Progress {
            test_file_path: None,
            notes: String::new(),
            review_attempts: 0,
            rejection_history: Vec::new(),
        };

        info!(task = %config.task_id, kind = %config.kind, "Writing tests");
        match self
            .ask::<WriteTestsOutput>(config, TddStep::WriteTests, None)
            .await
        {
            None => {
                progress.notes = "Failed to write tests.".to_string();
                return progress.finish(&config.task_id, TddStatus::Discarded);
            }
            Some(out) => {
                progress.test_file_path = out.test_file_path;
                progress.notes = out.notes;
                if out.status == WriteTestsStatus::Discarded {
                    return progress.finish(&config.task_id, TddStatus::Discarded);
                }
            }
        }

        loop {
            if progress.review_attempts >= config.max_review_attempts {
                warn!(
                    task = %config.task_id,
                    attempts = progress.review_attempts,
                    "Review attempts exhausted"
                );
                return progress.finish(&config.task_id, TddStatus::MaxAttemptsReached);
            }

            info!(task = %config.task_id, attempt = progress.review_attempts + 1, "Implementing");
            let feedback = feedback_section(&progress.rejection_history);
            match self
                .ask::<ImplementOutput>(config, TddStep::Implement, feedback.as_deref())
                .await
            {
                None => {
                    progress.notes.push_str("\n\nFailed to implement.");
                    return progress.finish(&config.task_id, TddStatus::Discarded);
                }
                Some(out) => {
                    progress.notes.push_str(&format!("\n\nImplement: {}", out.notes));
                    if out.status == ImplementStatus::Discarded {
                        return progress.finish(&config.task_id, TddStatus::Discarded);
                    }
                }
            }

            if templates::template(config.kind, TddStep::Refactor).is_some() {
                info!(task = %config.task_id, "Refactoring");
                match self
                    .ask::<RefactorOutput>(config, TddStep::Refactor, None)
                    .await
                {
                    Some(out) => {
                        progress.notes.push_str(&format!("\n\nRefactor: {}", out.notes))
                    }
                    None => warn!(
                        task = %config.task_id,
                        "Refactor produced no result, continuing to review"
                    ),
                }
            }

            info!(task = %config.task_id, attempt = progress.review_attempts + 1, "Reviewing");
            let review = self.ask::<ReviewOutput>(config, TddStep::Review, None).await;
            progress.review_attempts += 1;
            let Some(out) = review else {
                warn!(task = %config.task_id, "Review produced no result");
                return progress.finish(&config.task_id, TddStatus::MaxAttemptsReached);
            };

            if out.status == ReviewVerdict::Success {
                progress.notes.push_str(&format!("\n\nReview: {}", out.notes));
                return progress.finish(&config.task_id, TddStatus::Success);
            }

            progress
                .notes
                .push_str(&format!("\n\nReview (rejected): {}", out.notes));
            let reason = out
                .rejection_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(out.notes);
            progress.rejection_history.push(reason);
        }
    }

    async fn ask<T: DeserializeOwned + JsonSchema>(
        &self,
        config: &TddConfig,
        step: TddStep,
        suffix: Option<&str>,
    ) -> Option<T> {
        let mut instructions = templates::render(config, step)?;
        if let Some(extra) = suffix {
            instructions.push_str(extra);
        }
        let tools = match step {
            TddStep::Review => &self.settings.read_tools,
            _ => &self.settings.write_tools,
        };
        let request = match AgentRequest::for_output::<T>(
            instructions,
            tools,
            &config.worktree,
            &self.settings.model,
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!(step = step.as_str(), error = %e, "Could not build agent request");
                return None;
            }
        };
        invoke_structured(self.gateway, &request, self.settings.max_output_retries).await
    }
}

fn feedback_section(history: &[String]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let lines: Vec<String> = history.iter().map(|r| format!("- {r}")).collect();
    Some(format!("\n\nPrevious review feedback:\n{}", lines.join("\n")))
}
