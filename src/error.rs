//! Error types
//!
//! Two layers of failure exist:
//! - `ExecutionFailure`: why one source unit did not succeed. It is recorded
//!   inside the `ExecutionResult` and never aborts a batch.
//! - `HarnessError`: conditions that abort the whole assignment and must be
//!   retried manually (invalid collaborator data, local filesystem errors).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::engine::Stage;

/// Per-unit failure taxonomy
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// Compiler or interpreter binary could not be started
    #[error("toolchain unavailable: `{program}` could not be started ({reason})")]
    ToolchainUnavailable { program: String, reason: String },

    /// Compiler exited unsuccessfully
    #[error("compilation failed{}", exit_suffix(.exit_code))]
    CompileFailed { exit_code: Option<i32> },

    /// Process exceeded its wall-clock bound and was killed
    #[error("{stage} timed out after {}", format_limit(.limit_ms))]
    Timeout { stage: Stage, limit_ms: u64 },

    /// Program exited non-zero or was killed by a signal
    #[error("runtime failure{}{}", exit_suffix(.exit_code), signal_suffix(.signal))]
    RuntimeFailure {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },

    /// Declared language has no recipe
    #[error("unsupported language: {language}")]
    UnsupportedLanguage { language: String },
}

impl ExecutionFailure {
    pub fn timeout(stage: Stage, limit: Duration) -> Self {
        Self::Timeout {
            stage,
            limit_ms: limit.as_millis() as u64,
        }
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" with exit code {}", c))
        .unwrap_or_default()
}

fn signal_suffix(signal: &Option<i32>) -> String {
    signal
        .map(|s| format!(" (killed by signal {})", s))
        .unwrap_or_default()
}

fn format_limit(limit_ms: &u64) -> String {
    let limit_ms = *limit_ms;
    if limit_ms % 1000 == 0 {
        format!("{}s", limit_ms / 1000)
    } else {
        format!("{}ms", limit_ms)
    }
}

/// Batch-aborting errors
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Collaborator output that violates the boundary contract
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local filesystem failure (workspace creation, source write, report write)
    #[error("filesystem error while {action}: {source}")]
    Filesystem {
        action: String,
        #[source]
        source: std::io::Error,
    },

    /// Language table or environment configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn filesystem(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Filesystem {
            action: action.into(),
            source,
        }
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
