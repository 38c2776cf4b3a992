//! Instructions sent to the agent for each pipeline phase.

use std::path::Path;

const SEVERITY_GUIDE: &str = "\
Severity levels:
* HIGH: crashes, data loss, security vulnerabilities or major functionality failures.
* MEDIUM: significant inconvenience, incorrect results or partial loss of functionality.
* LOW: minor issues that do not significantly impact usability or functionality.";

pub fn suggest_entrypoints() -> String {
    "You are a bug hunting agent looking for potential bugs in this codebase.
Suggest a couple of entrypoint files that are good starting points for a bug search.
Return the file paths and your reasoning."
        .to_string()
}

/// `tracked` is the JSON of the items already known, so the agent can skip them.
pub fn scout(entrypoint: &str, tracked: &str) -> String {
    format!(
        r#"Explore this codebase looking for ways to:
* cause an unhandled exception or crash
* cause incorrect behavior that is not expected
* hit missing configuration that is not detected at start up but fails once used
* trigger performance bottlenecks that can be easily fixed

Your starting point is the file: @{entrypoint}
Branch out to other files as needed to understand the code, but focus on issues in this file.

Already tracked bugs (do not report these again):
{tracked}

{SEVERITY_GUIDE}

Report 1-3 HIGH severity bugs. For each one provide:
- short_description: a brief description of the bug
- severity: HIGH, MEDIUM or LOW
- relevant_files: file paths relevant to the bug
- details: full context and steps to reproduce
Also summarise what you explored in exploration_summary."#
    )
}

pub fn classify(item: &str, details: &str) -> String {
    format!(
        r#"Classify this potential bug:
{item}

Details:
{details}

Classify it along two dimensions:
1. reproducibility_approach: UNIT_TEST, MANUAL or INTEGRATION_TEST, depending on how the bug is best reproduced.
2. reproducibility_chance: EASY, MEDIUM or HARD, depending on how likely a developer can reproduce it from the information given.

A unit test is preferred because it needs no environment. Some bugs only show up across several units;
prefer an integration test for those. Manual reproduction costs the most effort and comes last.

Explain your reasoning."#
    )
}

pub fn reproduce(id: &str, item: &str, details: &str, worktree: &Path) -> String {
    format!(
        r#"You are a bug reproduction agent. Reproduce this bug with a unit test:
{item}

Details:
{details}

You are on a git worktree created for this bug at {worktree}.
The test must fail while the bug is present. Use the `testing-anti-patterns` skill to write good tests.

Once the bug is reproduced:
1. Commit with a message stating that this reproduces {id}
2. Return status PREPARED_FOR_FIX with the test file path and notes

If reproducing needs extensive setup or very complex steps:
1. Return status DISCARDED with the reason in notes"#,
        worktree = worktree.display()
    )
}

pub fn fix(id: &str, item: &str, details: &str, rejection: Option<&str>, worktree: &Path) -> String {
    let previous = rejection
        .map(|reason| format!("\n\nPrevious fix was rejected:\nReason: {reason}"))
        .unwrap_or_default();
    format!(
        r#"You are a bug fixing agent. This bug has been reproduced by a unit test:
{item}

Details:
{details}{previous}

You are on a git worktree created for this bug at {worktree}.
Make the reproducing tests pass by changing the code. Once a first solution works, simplify the change as
much as possible, then rework the tests to fit the project's style: describe the situation under test, not bug ids.

Use the `test-driven-development` and `testing-anti-patterns` skills.

Once fixed:
1. Commit with a message stating that this fixes {id}
2. Return status READY_FOR_REVIEW with a fix description and notes

If you cannot fix it, or it turns out not to be a bug:
1. Return status DISCARDED with the reason in notes"#,
        worktree = worktree.display()
    )
}

pub fn refactor(item: &str, details: &str, worktree: &Path) -> String {
    format!(
        r#"You are a refactoring agent. Clean up the code written while fixing this bug:
{item}

Details:
{details}

You are on a git worktree at {worktree} that contains the fix.

1. Simplify production code: remove complexity introduced by the fix, merge duplicate logic,
   improve naming, drop dead paths. Keep changes small.
2. Turn the TDD tests into maintainable tests: remove scaffolding, merge cases covering the same
   behavior, test behavior rather than implementation, drop tests that only exercise mocks.
3. Run the tests again to make sure nothing broke.

Use the `testing-anti-patterns` skill. Commit the refactoring with a clear message."#,
        worktree = worktree.display()
    )
}

pub fn review(item: &str, details: &str, worktree: &Path) -> String {
    format!(
        r#"This bug was reproduced and a fix was implemented:
{item}

Details:
{details}

You are on a git worktree at {worktree} containing the reproduction and the fix.
Review the changes with git diff. Commit messages tell which commits reproduce and which fix the bug.

Check whether the fix addresses the whole bug and whether the changes follow the project's style.

If more changes are needed:
- Return status PREPARED_FOR_FIX with rejection_reason explaining what must change

If the bug is fully fixed:
- Return status SOLVED with review notes

Stay focused on this bug only."#,
        worktree = worktree.display()
    )
}
