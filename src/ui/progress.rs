use crate::orchestrator::phases::{PhaseReport, PhaseStatus};
use crate::orchestrator::router::Phase;
use crate::orchestrator::runner::{RunOutcome, RunSummary};
use crate::tracking::ItemStatus;
use crate::ui::icons::{BUG, CHECK, CROSS, RESUME, SKIP, SPARKLE, STALL};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal UI for a hunt, rendered via `indicatif`.
///
/// A single spinner shows the phase in flight. Finished phases and their
/// messages are printed above it, so the scrollback reads as a run log.
pub struct HuntUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    verbose: bool,
    phases_run: AtomicU32,
}

impl HuntUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let phase_bar = multi.add(ProgressBar::new_spinner());
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phase");

        Self {
            multi,
            phase_bar,
            verbose,
            phases_run: AtomicU32::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn run_started(&self, project: &str, run_id: &str, resumed: bool) {
        let (icon, verb) = if resumed {
            (RESUME, "Resuming")
        } else {
            (BUG, "Hunting")
        };
        self.print_line(format!(
            "{}{} {} {}",
            icon,
            verb,
            style(project).bold(),
            style(format!("({run_id})")).dim()
        ));
    }

    /// Start the spinner for `phase`.
    pub fn start_phase(&self, phase: Phase) {
        let n = self.phases_run.load(Ordering::SeqCst) + 1;
        self.phase_bar.set_message(format!(
            "{} {}",
            style(phase).yellow(),
            style(format!("(#{n})")).dim()
        ));
        self.phase_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Print the outcome line for a finished phase and its messages.
    pub fn phase_finished(&self, report: &PhaseReport) {
        self.phases_run.fetch_add(1, Ordering::SeqCst);
        let icon = match report.status {
            PhaseStatus::Completed => CHECK,
            PhaseStatus::Skipped => SKIP,
            PhaseStatus::Failed => CROSS,
        };
        let target = report
            .target
            .as_ref()
            .map(|id| format!(" {}", style(id).cyan()))
            .unwrap_or_default();
        self.print_line(format!("{}{}{}", icon, style(report.phase).bold(), target));
        for msg in &report.update.messages {
            if self.verbose || report.status != PhaseStatus::Skipped {
                self.print_line(format!("    {} {}", style("→").dim(), msg));
            }
        }
    }

    /// Print a free-form line above the spinner.
    pub fn message(&self, msg: &str) {
        self.print_line(format!("  {}", style(msg).dim()));
    }

    /// Ask whether to resume `run_id`. Anything but an explicit yes starts fresh.
    pub fn confirm_resume(&self, run_id: &str) -> bool {
        self.multi.suspend(|| {
            dialoguer::Confirm::new()
                .with_prompt(format!("Incomplete run {run_id} detected. Resume?"))
                .default(false)
                .interact()
                .unwrap_or(false)
        })
    }

    /// Stop the spinner and print the end-of-run summary.
    pub fn finish(&self, summary: &RunSummary) {
        self.phase_bar.finish_and_clear();
        match &summary.outcome {
            RunOutcome::Completed => self.print_line(format!(
                "{}Run {} finished after {} phases",
                SPARKLE,
                style(&summary.run_id).bold(),
                summary.phases_run
            )),
            RunOutcome::Stalled { phase, passes } => self.print_line(format!(
                "{}Run {} stalled: {} failed {} times in a row. Run again to resume.",
                STALL,
                style(&summary.run_id).bold(),
                style(phase).yellow(),
                passes
            )),
        }

        let counts: Vec<String> = ItemStatus::all()
            .iter()
            .filter_map(|status| {
                let n = summary
                    .state
                    .items
                    .values()
                    .filter(|item| item.status == *status)
                    .count();
                (n > 0).then(|| format!("{status}: {n}"))
            })
            .collect();
        if !counts.is_empty() {
            self.print_line(format!("  {}", counts.join(", ")));
        }
        for note in summary.needs_attention() {
            self.print_line(format!("  {} {}", style("!").red().bold(), note));
        }
    }

    /// Stop the spinner without a summary, e.g. on cancellation.
    pub fn abandon(&self, reason: &str) {
        self.phase_bar.abandon_with_message(reason.to_string());
    }
}

impl Drop for HuntUI {
    fn drop(&mut self) {
        if !self.phase_bar.is_finished() {
            self.phase_bar.finish_and_clear();
        }
    }
}
