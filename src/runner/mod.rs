//! Runner module - Process execution layer
//!
//! This module spawns exactly one external toolchain invocation (a compile or
//! a run step) and reports how it ended:
//! - `Completed`: the process exited (successfully or not) within its bound
//! - `TimedOut`: the process group was killed after the deadline
//! - `ToolchainUnavailable`: the program could not be started at all
//!
//! The runner module does NOT:
//! - Create or delete working directories (the caller owns them)
//! - Interpret exit codes as success/failure of a solution
//! - Truncate captured output

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution.
///
/// Always an argument vector; nothing is ever passed through a shell.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Environment variables added to the inherited environment
    pub env: Vec<(String, String)>,
    /// Address-space limit in MB
    pub memory_limit_mb: Option<u64>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            memory_limit_mb: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: Option<u64>) -> Self {
        self.memory_limit_mb = limit;
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        Some(Self::new(program.clone()).with_args(args.iter().cloned()))
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Captured output of a process that exited on its own
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, absent when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(ProcessOutput),
    /// Deadline exceeded; the whole process group was killed and reaped
    TimedOut { limit: Duration, elapsed: Duration },
    /// The program could not be spawned (missing binary, not executable, ...)
    ToolchainUnavailable { program: String, reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(output) if output.is_success())
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            RunOutcome::Completed(output) => output.elapsed,
            RunOutcome::TimedOut { elapsed, .. } => *elapsed,
            RunOutcome::ToolchainUnavailable { .. } => Duration::ZERO,
        }
    }
}

/// Runner trait for executing one toolchain invocation
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `cmd` inside `work_dir`, killing it once `timeout` elapses.
    ///
    /// `Err` is reserved for failures of the runner itself (e.g. broken pipes);
    /// every way the child can end is a `RunOutcome`.
    async fn run(&self, cmd: &CommandSpec, work_dir: &Path, timeout: Duration)
        -> Result<RunOutcome>;
}

/// Expand `{source}`, `{file}`, `{stem}`, `{main}` and `{dir}` in each argument of a recipe command
pub fn expand_template(template: &[String], vars: &TemplateVars) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{source}", &vars.source.to_string_lossy())
                .replace("{file}", &vars.file)
                .replace("{stem}", &vars.stem)
                .replace("{main}", &vars.main)
                .replace("{dir}", &vars.dir.to_string_lossy())
        })
        .collect()
}

/// Values substituted into recipe command templates
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub source: PathBuf,
    pub file: String,
    pub stem: String,
    /// Qualified entry name, equal to `stem` outside packaged languages
    pub main: String,
    pub dir: PathBuf,
}

// Re-exports
pub use local::LocalRunner;
