use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `RTERM_LOG=debug`
pub const LOG_ENV: &str = "RTERM_LOG";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to a file; used while the TUI owns the terminal
    File(PathBuf),
    Stderr,
    Discard,
}

impl LogTarget {
    /// The TUI draws on stdout, so without a log file nothing is logged
    pub fn for_tui(log_file: Option<&Path>) -> Self {
        match log_file {
            Some(path) => LogTarget::File(path.to_path_buf()),
            None => LogTarget::Discard,
        }
    }

    pub fn for_command(log_file: Option<&Path>) -> Self {
        match log_file {
            Some(path) => LogTarget::File(path.to_path_buf()),
            None => LogTarget::Stderr,
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(target: &LogTarget) -> anyhow::Result<()> {
    match target {
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        LogTarget::Stderr => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(io::stderr)
                .try_init();
        }
        LogTarget::Discard => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(io::sink)
                .try_init();
        }
    }
    Ok(())
}
