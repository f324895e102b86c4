//! Error types for service supervision.
//!
//! None of these are fatal. The supervisor renders them into the service's
//! own output buffer, and the liveness prober maps them to "not running".

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("POSIX shell not found (searched: {}). Please install Git Bash or set `shell` in svcman.toml.", format_candidates(.searched))]
    ShellNotFound { searched: Vec<PathBuf> },

    #[error("Failed to start {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run stop command: {0}")]
    StopCommand(String),

    #[error("Process query failed: {0}")]
    Probe(String),
}

impl SupervisorError {
    pub fn stop_command(detail: impl Into<String>) -> Self {
        Self::StopCommand(detail.into())
    }

    pub fn probe(detail: impl Into<String>) -> Self {
        Self::Probe(detail.into())
    }

    /// Renders the error as a line for a service's output buffer.
    pub fn diagnostic(&self) -> String {
        format!("[ERROR] {}", self)
    }
}

fn format_candidates(searched: &[PathBuf]) -> String {
    if searched.is_empty() {
        return "no candidates".to_string();
    }
    searched
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
