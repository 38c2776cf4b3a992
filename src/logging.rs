//! Tracing setup: human output on stderr plus a log file per project.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "bughunt.log";

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "bughunt=debug" } else { "bughunt=info" }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber. Stderr only shows warnings unless
/// `verbose`, since the terminal UI reports progress; the file under
/// `log_dir` gets everything the filter lets through.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost.
pub fn init(log_dir: Option<&Path>, verbose: bool, json: bool) -> Result<Option<WorkerGuard>> {
    let stderr_level = if verbose { "bughunt=debug" } else { "bughunt=warn" };
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_level)),
        );

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(stderr)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
    let file = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter(verbose))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter(verbose))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(Some(guard))
}
