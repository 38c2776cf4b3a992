//! Phase routing, execution and the checkpointed run loop.

pub mod checkpoint;
pub mod phases;
pub mod router;
pub mod runner;

pub use checkpoint::{CheckpointManager, ResumePolicy, RunStart, RunStatus};
pub use phases::{PhaseExecutor, PhaseReport, PhaseStatus};
pub use router::Phase;
pub use runner::{HuntRunner, RunOutcome, RunSummary};
