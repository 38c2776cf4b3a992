//! Status-driven phase routing.
//!
//! Both routers are pure functions of the state snapshot: the same snapshot
//! always yields the same phase and the same target item.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::FixStrategy;
use crate::tracking::{FixStatus, HuntState, ItemStatus, Severity, WorkItem};

/// The phases of the hunt pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SuggestEntrypoints,
    Scout,
    Classify,
    Reproduce,
    Fix,
    Refactor,
    Review,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuggestEntrypoints => "suggest_entrypoints",
            Self::Scout => "scout",
            Self::Classify => "classify",
            Self::Reproduce => "reproduce",
            Self::Fix => "fix",
            Self::Refactor => "refactor",
            Self::Review => "review",
        }
    }

    pub fn all() -> [Phase; 7] {
        [
            Self::SuggestEntrypoints,
            Self::Scout,
            Self::Classify,
            Self::Reproduce,
            Self::Fix,
            Self::Refactor,
            Self::Review,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

fn first_matching(
    state: &HuntState,
    pred: impl Fn(&WorkItem) -> bool,
) -> Option<&WorkItem> {
    // BTreeMap iteration is ascending by id, so the first hit is the lowest id.
    state.items.values().find(|item| pred(*item))
}

fn unit_test_in(status: ItemStatus) -> impl Fn(&WorkItem) -> bool {
    move |item| item.status == status && item.is_unit_test()
}

/// Lowest-id item awaiting review (also the refactor target).
pub fn ready_for_review(state: &HuntState) -> Option<&WorkItem> {
    first_matching(state, unit_test_in(ItemStatus::ReadyForReview))
}

/// Lowest-id item awaiting a fix.
pub fn prepared_for_fix(state: &HuntState) -> Option<&WorkItem> {
    first_matching(state, unit_test_in(ItemStatus::PreparedForFix))
}

/// Lowest-id classified item awaiting reproduction.
pub fn in_analysis(state: &HuntState) -> Option<&WorkItem> {
    first_matching(state, unit_test_in(ItemStatus::InAnalysis))
}

/// Lowest-id unclassified high-severity item.
pub fn potential_high(state: &HuntState) -> Option<&WorkItem> {
    first_matching(state, |item| {
        item.status == ItemStatus::Potential && item.severity == Severity::High
    })
}

/// The item a phase would act on in this snapshot, if any.
pub fn target_for(state: &HuntState, phase: Phase) -> Option<&WorkItem> {
    match phase {
        Phase::Review | Phase::Refactor => ready_for_review(state),
        Phase::Fix => prepared_for_fix(state),
        Phase::Reproduce => in_analysis(state),
        Phase::Classify => potential_high(state),
        Phase::SuggestEntrypoints | Phase::Scout => None,
    }
}

/// Main router: first matching tier wins.
pub fn route(state: &HuntState) -> Phase {
    if ready_for_review(state).is_some() {
        Phase::Review
    } else if prepared_for_fix(state).is_some() {
        Phase::Fix
    } else if in_analysis(state).is_some() {
        Phase::Reproduce
    } else if potential_high(state).is_some() {
        Phase::Classify
    } else if !state.queue.is_empty() {
        Phase::Scout
    } else {
        Phase::SuggestEntrypoints
    }
}

/// Router consulted after a review. Re-enters fix while some rejected fix
/// still has review attempts left; `None` ends the run.
pub fn route_after_review(state: &HuntState, max_review_attempts: u32) -> Option<Phase> {
    let retry = state
        .items
        .values()
        .filter(|item| item.status == ItemStatus::PreparedForFix && item.is_unit_test())
        .filter_map(|item| state.fixes.get(&item.id))
        .any(|fix| fix.status == FixStatus::Rejected && fix.review_attempts < max_review_attempts);
    retry.then_some(Phase::Fix)
}

/// Where the pipeline goes once `finished` completes. Scout always feeds
/// classify; fix, refactor and review form a fixed chain. Under the TDD
/// strategy reproduce runs the whole fix loop, so it is followed by the
/// post-review router.
pub fn next_after(
    state: &HuntState,
    finished: Phase,
    strategy: FixStrategy,
    max_review_attempts: u32,
) -> Option<Phase> {
    match (finished, strategy) {
        (Phase::Scout, _) => Some(Phase::Classify),
        (Phase::Fix, _) => Some(Phase::Refactor),
        (Phase::Refactor, _) => Some(Phase::Review),
        (Phase::Review, _) | (Phase::Reproduce, FixStrategy::Tdd) => {
            route_after_review(state, max_review_attempts)
        }
        (Phase::SuggestEntrypoints | Phase::Classify | Phase::Reproduce, _) => Some(route(state)),
    }
}
