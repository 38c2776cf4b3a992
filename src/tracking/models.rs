use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)-(\d+)$")
        .expect("work item id pattern is a valid static regex")
});

/// Identifier of a work item, rendered as `PREFIX-NNN`.
///
/// Ordering is by prefix, then by the numeric part, so `BUG-010` sorts after
/// `BUG-009` and `BUG-1000` after `BUG-999`. The router relies on this order
/// to pick the same item on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkItemId {
    prefix: String,
    number: u32,
}

impl WorkItemId {
    pub fn new(prefix: &str, number: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            number,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.prefix, self.number)
    }
}

impl FromStr for WorkItemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ID_PATTERN
            .captures(s.trim())
            .ok_or_else(|| format!("Invalid work item id: {}", s))?;
        let number = caps[2]
            .parse::<u32>()
            .map_err(|e| format!("Invalid work item number in {}: {}", s, e))?;
        Ok(Self::new(&caps[1], number))
    }
}

impl TryFrom<String> for WorkItemId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkItemId> for String {
    fn from(id: WorkItemId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

/// Lifecycle of a work item.
///
/// Progression is POTENTIAL → IN_ANALYSIS → PREPARED_FOR_FIX → READY_FOR_REVIEW
/// → SOLVED, with DISCARDED reachable from the analysis phases and a backward
/// edge READY_FOR_REVIEW → PREPARED_FOR_FIX when a review rejects the fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Potential,
    InAnalysis,
    PreparedForFix,
    ReadyForReview,
    Solved,
    Discarded,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Potential => "POTENTIAL",
            Self::InAnalysis => "IN_ANALYSIS",
            Self::PreparedForFix => "PREPARED_FOR_FIX",
            Self::ReadyForReview => "READY_FOR_REVIEW",
            Self::Solved => "SOLVED",
            Self::Discarded => "DISCARDED",
        }
    }

    pub fn all() -> [ItemStatus; 6] {
        [
            Self::Potential,
            Self::InAnalysis,
            Self::PreparedForFix,
            Self::ReadyForReview,
            Self::Solved,
            Self::Discarded,
        ]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReproApproach {
    UnitTest,
    Manual,
    IntegrationTest,
}

impl ReproApproach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitTest => "UNIT_TEST",
            Self::Manual => "MANUAL",
            Self::IntegrationTest => "INTEGRATION_TEST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReproChance {
    Easy,
    Medium,
    Hard,
}

impl ReproChance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "EASY",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
        }
    }
}

/// A tracked bug candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub short_description: String,
    pub severity: Severity,
    pub status: ItemStatus,
    #[serde(default)]
    pub relevant_files: Vec<String>,
    #[serde(default)]
    pub reproducibility_chance: Option<ReproChance>,
    #[serde(default)]
    pub reproducibility_approach: Option<ReproApproach>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a freshly discovered item in POTENTIAL status.
    pub fn new(
        id: WorkItemId,
        short_description: &str,
        severity: Severity,
        relevant_files: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            short_description: short_description.to_string(),
            severity,
            status: ItemStatus::Potential,
            relevant_files,
            reproducibility_chance: None,
            reproducibility_approach: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this item moved to `status`, with a fresh update timestamp.
    pub fn with_status(&self, status: ItemStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Copy of this item moved to IN_ANALYSIS with its classification recorded.
    pub fn classified(&self, approach: ReproApproach, chance: ReproChance) -> Self {
        Self {
            status: ItemStatus::InAnalysis,
            reproducibility_approach: Some(approach),
            reproducibility_chance: Some(chance),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_unit_test(&self) -> bool {
        self.reproducibility_approach == Some(ReproApproach::UnitTest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    InReview,
    Rejected,
    Finished,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InReview => "IN_REVIEW",
            Self::Rejected => "REJECTED",
            Self::Finished => "FINISHED",
        }
    }
}

/// The active fix for a work item. At most one exists per item id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub item_id: WorkItemId,
    pub status: FixStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub manual_adjustments: Option<String>,
    /// Number of review verdicts recorded against this fix.
    #[serde(default)]
    pub review_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fix {
    /// A fix submitted for review. A previous fix for the same item keeps its
    /// creation time, attempt count and manual notes.
    pub fn submitted(item_id: &WorkItemId, previous: Option<&Fix>) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.clone(),
            status: FixStatus::InReview,
            rejection_reason: previous.and_then(|p| p.rejection_reason.clone()),
            manual_adjustments: previous.and_then(|p| p.manual_adjustments.clone()),
            review_attempts: previous.map(|p| p.review_attempts).unwrap_or(0),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    /// Copy of this fix after an accepting review.
    pub fn finished(&self) -> Self {
        Self {
            status: FixStatus::Finished,
            review_attempts: self.review_attempts + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Copy of this fix after a rejecting review.
    pub fn rejected(&self, reason: Option<String>) -> Self {
        Self {
            status: FixStatus::Rejected,
            rejection_reason: reason,
            review_attempts: self.review_attempts + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}
