//! Instruction templates per task kind and step.
//!
//! Placeholders: `{task_id}`, `{description}`, `{details}`, `{relevant_files}`.

use super::{TaskKind, TddConfig, TddStep};

const BUG_FIX_WRITE_TESTS: &str = r#"You are reproducing bug {task_id}.

Bug description: {description}
Details: {details}
Relevant files: {relevant_files}

Write a failing unit test that demonstrates the bug.
Use the `testing-anti-patterns` skill for guidance.
Commit your test with message: "test: reproduce {task_id}"

If the bug cannot be reproduced, return status DISCARDED with the reason."#;

const BUG_FIX_IMPLEMENT: &str = r#"Fix bug {task_id}. The failing test is already in place.

Make the test pass with minimal changes.
Use the `test-driven-development` skill.
Commit with message: "fix: {task_id}""#;

const BUG_FIX_REFACTOR: &str = r#"Clean up the fix for {task_id}.

- Simplify production code
- Turn TDD tests into maintainable tests
- Remove test scaffolding
- Make sure tests still pass

Use the `testing-anti-patterns` skill.
Commit with message: "refactor: clean up {task_id}""#;

const BUG_FIX_REVIEW: &str = r#"Review the fix for {task_id}.

Check:
- Does the fix fully address the bug?
- Does the code follow project style?
- Are the tests meaningful?

Return SUCCESS if complete, or REJECTED with a reason."#;

const FEATURE_WRITE_TESTS: &str = r#"Implement feature {task_id}.

Feature description: {description}
Details: {details}
Relevant files: {relevant_files}

Write tests that specify the expected behavior.
Focus on what the feature should do, not how.
Commit with message: "test: specify {task_id}""#;

const FEATURE_IMPLEMENT: &str = r#"Build feature {task_id}. Tests are in place.

Implement the minimal code that makes the tests pass.
Commit with message: "feat: {task_id}""#;

const FEATURE_REFACTOR: &str = r#"Clean up the implementation of {task_id}.

- Remove duplication
- Improve naming
- Simplify logic
- Make sure tests still pass

Commit with message: "refactor: clean up {task_id}""#;

const FEATURE_REVIEW: &str = r#"Review feature {task_id}.

Check:
- Does it meet the requirements?
- Is the implementation clean?
- Are edge cases handled?

Return SUCCESS or REJECTED with a reason."#;

const REFACTOR_WRITE_TESTS: &str = r#"Prepare to refactor {task_id}.

Refactoring goal: {description}
Details: {details}
Relevant files: {relevant_files}

Write characterization tests that capture the current behavior
so the refactoring cannot silently change it.
Commit with message: "test: characterize {task_id}""#;

const REFACTOR_IMPLEMENT: &str = r#"Refactor {task_id}. Characterization tests are in place.

Goal: {description}

Make the changes while keeping every test green.
Commit with message: "refactor: {task_id}""#;

const REFACTOR_REVIEW: &str = r#"Review refactoring {task_id}.

Check:
- Is behavior preserved?
- Is the code cleaner?
- Do all tests pass?

Return SUCCESS or REJECTED with a reason."#;

/// Template for a step, `None` when the kind skips that step.
pub fn template(kind: TaskKind, step: TddStep) -> Option<&'static str> {
    use TaskKind as K;
    use TddStep as S;
    match (kind, step) {
        (K::BugFix, S::WriteTests) => Some(BUG_FIX_WRITE_TESTS),
        (K::BugFix, S::Implement) => Some(BUG_FIX_IMPLEMENT),
        (K::BugFix, S::Refactor) => Some(BUG_FIX_REFACTOR),
        (K::BugFix, S::Review) => Some(BUG_FIX_REVIEW),
        (K::Feature, S::WriteTests) => Some(FEATURE_WRITE_TESTS),
        (K::Feature, S::Implement) => Some(FEATURE_IMPLEMENT),
        (K::Feature, S::Refactor) => Some(FEATURE_REFACTOR),
        (K::Feature, S::Review) => Some(FEATURE_REVIEW),
        (K::Refactor, S::WriteTests) => Some(REFACTOR_WRITE_TESTS),
        (K::Refactor, S::Implement) => Some(REFACTOR_IMPLEMENT),
        (K::Refactor, S::Refactor) => None,
        (K::Refactor, S::Review) => Some(REFACTOR_REVIEW),
    }
}

/// Fill a step's template from the task descriptor.
pub fn render(config: &TddConfig, step: TddStep) -> Option<String> {
    let files = if config.relevant_files.is_empty() {
        "none specified".to_string()
    } else {
        config.relevant_files.join(", ")
    };
    template(config.kind, step).map(|t| {
        t.replace("{task_id}", &config.task_id)
            .replace("{description}", &config.description)
            .replace("{details}", &config.details)
            .replace("{relevant_files}", &files)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(kind: TaskKind) -> TddConfig {
        TddConfig {
            task_id: "BUG-004".into(),
            kind,
            worktree: PathBuf::from("/wt"),
            description: "off by one in pager".into(),
            details: "page 2 repeats the last row".into(),
            relevant_files: vec!["pager.py".into(), "views.py".into()],
            max_review_attempts: 3,
        }
    }

    #[test]
    fn test_every_kind_has_write_implement_review() {
        for kind in [TaskKind::BugFix, TaskKind::Feature, TaskKind::Refactor] {
            for step in [TddStep::WriteTests, TddStep::Implement, TddStep::Review] {
                assert!(template(kind, step).is_some(), "{kind:?} {step:?}");
            }
        }
    }

    #[test]
    fn test_refactor_tasks_skip_refactor_step() {
        assert!(template(TaskKind::Refactor, TddStep::Refactor).is_none());
        assert!(template(TaskKind::BugFix, TddStep::Refactor).is_some());
    }

    #[test]
    fn test_render_fills_placeholders() {
        let text = render(&config(TaskKind::BugFix), TddStep::WriteTests).unwrap();
        assert!(text.contains("You are reproducing bug BUG-004."));
        assert!(text.contains("Relevant files: pager.py, views.py"));
        assert!(text.contains("test: reproduce BUG-004"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn test_render_without_files() {
        let mut cfg = config(TaskKind::Feature);
        cfg.relevant_files.clear();
        let text = render(&cfg, TddStep::WriteTests).unwrap();
        assert!(text.contains("Relevant files: none specified"));
    }
}
