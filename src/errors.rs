//! Typed error hierarchy for the bughunt orchestrator.
//!
//! Four enums cover the subsystems whose failures callers need to tell apart:
//! - `StoreError`: the on-disk work item store (items, fixes, queue, details)
//! - `CheckpointError`: the run snapshot store and its pointer file
//! - `GatewayError`: the external agent process
//! - `RunError`: the top-level run loop
//!
//! Gateway failures are phase-level and never abort a run. Store and checkpoint
//! failures are fatal: a run that cannot be made durable stops.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the work item store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("State directory {path} is locked by another bughunt process")]
    Locked { path: PathBuf },
}

/// Errors from the checkpoint snapshot store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Checkpoint for run {run_id} is corrupt: {source}")]
    Corrupt {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint pointer error: {0}")]
    Pointer(#[source] std::io::Error),

    #[error("Checkpoint task panicked")]
    TaskPanicked,

    #[error("Checkpoint lock poisoned")]
    LockPoisoned,
}

/// Errors from the external agent gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to spawn agent process `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent process exited with code {exit_code}")]
    NonZeroExit { exit_code: i32 },

    #[error("Failed to build output schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Errors that terminate the run loop.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Run cancelled by operator")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_write_carries_path() {
        let path = PathBuf::from("/state/items.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = StoreError::Write {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            StoreError::Write { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Write"),
        }
        assert!(err.to_string().contains("/state/items.json"));
    }

    #[test]
    fn run_error_converts_from_store_error() {
        let inner = StoreError::Locked {
            path: PathBuf::from("/state"),
        };
        let run_err: RunError = inner.into();
        assert!(matches!(
            run_err,
            RunError::Persistence(StoreError::Locked { .. })
        ));
    }

    #[test]
    fn run_error_converts_from_checkpoint_error() {
        let run_err: RunError = CheckpointError::LockPoisoned.into();
        assert!(matches!(
            run_err,
            RunError::Checkpoint(CheckpointError::LockPoisoned)
        ));
    }

    #[test]
    fn gateway_error_non_zero_exit_carries_code() {
        let err = GatewayError::NonZeroExit { exit_code: 2 };
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::Locked {
            path: PathBuf::from("x"),
        });
        assert_std_error(&CheckpointError::TaskPanicked);
        assert_std_error(&GatewayError::NonZeroExit { exit_code: 1 });
        assert_std_error(&RunError::Cancelled);
    }
}
