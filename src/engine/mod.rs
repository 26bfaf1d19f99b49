//! Execution engine - compile/run orchestration for one source unit
//!
//! Every `SourceUnit` produces exactly one `ExecutionResult`. Toolchain
//! problems, compile errors, crashes, timeouts and unknown languages all end
//! up as a non-succeeding result; only local filesystem failures surface as
//! `HarnessError`.

pub mod executor;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ExecutionFailure;
use crate::solution::SourceUnit;

pub use executor::{EngineConfig, ExecutionEngine};

/// Toolchain step that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Compile => "compile",
            Stage::Run => "run",
        };
        write!(f, "{}", s)
    }
}

/// Normalized outcome of compiling and running one source unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub identifier: String,
    pub language: String,
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    /// Last stage attempted; absent when the language was never resolved
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub(crate) fn new(unit: &SourceUnit, stage: Option<Stage>, duration: Duration) -> Self {
        Self {
            identifier: unit.identifier.clone(),
            language: unit.language.clone(),
            stdout: String::new(),
            stderr: String::new(),
            succeeded: false,
            stage,
            failure: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Result for a unit that failed before or during a stage, with a message in stderr
    pub(crate) fn failed(
        unit: &SourceUnit,
        stage: Option<Stage>,
        failure: ExecutionFailure,
        stderr: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let mut result = Self::new(unit, stage, duration);
        result.stderr = stderr.into();
        result.failure = Some(failure);
        result
    }

    /// One-line summary for logs and report labels
    pub fn summary(&self) -> String {
        match &self.failure {
            None if self.succeeded => "succeeded".to_string(),
            None => "failed".to_string(),
            Some(failure) => failure.to_string(),
        }
    }
}
