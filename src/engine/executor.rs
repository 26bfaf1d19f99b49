use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{ExecutionResult, Stage};
use crate::error::{ExecutionFailure, HarnessError, HarnessResult};
use crate::languages::{LanguageRecipe, LanguageTable};
use crate::runner::{expand_template, CommandSpec, RunOutcome, Runner, TemplateVars};
use crate::solution::SourceUnit;
use crate::workspace::WorkspaceHandle;

/// Engine settings fixed at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent directory for per-unit workspaces (system temp when None)
    pub workspace_root: Option<PathBuf>,
    /// Maximum units executing at once in `execute_batch`
    pub max_parallel: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            max_parallel: 1,
        }
    }
}

/// Lifecycle of one unit, for tracing
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExecutionState {
    Pending,
    Compiling,
    Running,
    Done,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Compiling => "compiling",
            ExecutionState::Running => "running",
            ExecutionState::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Result of one toolchain step that did not end the execution
enum StepOutcome {
    Passed,
    Finished(ExecutionResult),
}

pub struct ExecutionEngine {
    languages: Arc<LanguageTable>,
    runner: Arc<dyn Runner>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(languages: Arc<LanguageTable>, runner: Arc<dyn Runner>, config: EngineConfig) -> Self {
        Self {
            languages,
            runner,
            config,
        }
    }

    /// Execute one unit to completion.
    ///
    /// `Err` only for local filesystem failures, which abort the batch.
    pub async fn execute(&self, unit: &SourceUnit) -> HarnessResult<ExecutionResult> {
        let started = Instant::now();

        let recipe = match self.languages.resolve(&unit.language) {
            Ok(recipe) => recipe,
            Err(failure) => {
                warn!("{}: {}", unit.identifier, failure);
                let message = failure.to_string();
                return Ok(ExecutionResult::failed(
                    unit,
                    None,
                    failure,
                    message,
                    started.elapsed(),
                ));
            }
        };

        trace_state(unit, ExecutionState::Pending);
        let workspace = WorkspaceHandle::acquire(self.config.workspace_root.as_deref(), &unit.identifier)?;
        let result = self.run_stages(unit, &recipe, &workspace, started).await;
        trace_state(unit, ExecutionState::Done);
        workspace.release();

        let result = result?;
        info!(
            "Executed {} ({}): stage={:?}, succeeded={}, duration_ms={}",
            result.identifier, recipe.name, result.stage, result.succeeded, result.duration_ms
        );
        Ok(result)
    }

    /// Execute units with bounded concurrency, returning results in input order
    pub async fn execute_batch(&self, units: &[SourceUnit]) -> HarnessResult<Vec<ExecutionResult>> {
        let parallel = self.config.max_parallel.max(1);
        debug!("Executing {} units (parallel={})", units.len(), parallel);

        stream::iter(units)
            .map(|unit| self.execute(unit))
            .buffered(parallel)
            .try_collect()
            .await
    }

    async fn run_stages(
        &self,
        unit: &SourceUnit,
        recipe: &LanguageRecipe,
        workspace: &WorkspaceHandle,
        started: Instant,
    ) -> HarnessResult<ExecutionResult> {
        let stem = recipe.source_stem(&unit.body);
        let file = recipe.source_file_name(&stem);
        let source = workspace.write_file(&file, &unit.body)?;
        let main = recipe.qualified_entry(&unit.body, &stem);
        let vars = TemplateVars {
            source,
            file,
            stem,
            main,
            dir: workspace.path().to_path_buf(),
        };

        if let Some(compile_template) = &recipe.compile_command {
            trace_state(unit, ExecutionState::Compiling);
            let cmd = build_command(compile_template, &vars, workspace, None)?;
            if let StepOutcome::Finished(result) = self
                .compile(unit, &cmd, workspace, recipe.compile_timeout, started)
                .await
            {
                return Ok(result);
            }
        }

        trace_state(unit, ExecutionState::Running);
        let cmd = build_command(&recipe.run_command, &vars, workspace, recipe.memory_limit_mb)?;
        Ok(self
            .run(unit, &cmd, workspace, recipe.run_timeout, started)
            .await)
    }

    async fn compile(
        &self,
        unit: &SourceUnit,
        cmd: &CommandSpec,
        workspace: &WorkspaceHandle,
        timeout: Duration,
        started: Instant,
    ) -> StepOutcome {
        let stage = Some(Stage::Compile);
        let outcome = match self.runner.run(cmd, workspace.path(), timeout).await {
            Ok(outcome) => outcome,
            Err(e) => return StepOutcome::Finished(runner_error(unit, Stage::Compile, e, started)),
        };
        debug!("{}: compile step took {:?}", unit.identifier, outcome.elapsed());

        match outcome {
            RunOutcome::Completed(output) if output.is_success() => {
                if !output.stderr.is_empty() {
                    debug!("{}: compiler diagnostics: {}", unit.identifier, output.stderr);
                }
                StepOutcome::Passed
            }
            RunOutcome::Completed(output) => {
                // Diagnostics go to stderr only; some compilers print to stdout
                let mut diagnostics = output.stderr;
                if !output.stdout.is_empty() {
                    if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                        diagnostics.push('\n');
                    }
                    diagnostics.push_str(&output.stdout);
                }
                StepOutcome::Finished(ExecutionResult::failed(
                    unit,
                    stage,
                    ExecutionFailure::CompileFailed {
                        exit_code: output.exit_code,
                    },
                    diagnostics,
                    started.elapsed(),
                ))
            }
            RunOutcome::TimedOut { limit, .. } => {
                let failure = ExecutionFailure::timeout(Stage::Compile, limit);
                let message = failure.to_string();
                StepOutcome::Finished(ExecutionResult::failed(
                    unit,
                    stage,
                    failure,
                    message,
                    started.elapsed(),
                ))
            }
            RunOutcome::ToolchainUnavailable { program, reason } => {
                let failure = ExecutionFailure::ToolchainUnavailable { program, reason };
                let message = failure.to_string();
                StepOutcome::Finished(ExecutionResult::failed(
                    unit,
                    stage,
                    failure,
                    message,
                    started.elapsed(),
                ))
            }
        }
    }

    async fn run(
        &self,
        unit: &SourceUnit,
        cmd: &CommandSpec,
        workspace: &WorkspaceHandle,
        timeout: Duration,
        started: Instant,
    ) -> ExecutionResult {
        let stage = Some(Stage::Run);
        let outcome = match self.runner.run(cmd, workspace.path(), timeout).await {
            Ok(outcome) => outcome,
            Err(e) => return runner_error(unit, Stage::Run, e, started),
        };
        debug!("{}: run step took {:?}", unit.identifier, outcome.elapsed());

        match outcome {
            RunOutcome::Completed(output) => {
                let mut result = ExecutionResult::new(unit, stage, started.elapsed());
                result.succeeded = output.is_success();
                if !result.succeeded {
                    result.failure = Some(ExecutionFailure::RuntimeFailure {
                        exit_code: output.exit_code,
                        signal: output.signal,
                    });
                }
                result.stdout = output.stdout;
                result.stderr = output.stderr;
                result
            }
            RunOutcome::TimedOut { limit, .. } => {
                let failure = ExecutionFailure::timeout(Stage::Run, limit);
                let message = failure.to_string();
                ExecutionResult::failed(unit, stage, failure, message, started.elapsed())
            }
            RunOutcome::ToolchainUnavailable { program, reason } => {
                let failure = ExecutionFailure::ToolchainUnavailable { program, reason };
                let message = failure.to_string();
                ExecutionResult::failed(unit, stage, failure, message, started.elapsed())
            }
        }
    }
}

fn trace_state(unit: &SourceUnit, state: ExecutionState) {
    debug!("{}: {}", unit.identifier, state);
}

fn build_command(
    template: &[String],
    vars: &TemplateVars,
    workspace: &WorkspaceHandle,
    memory_limit_mb: Option<u64>,
) -> HarnessResult<CommandSpec> {
    let argv = expand_template(template, vars);
    let cmd = CommandSpec::from_vec(&argv)
        .ok_or_else(|| HarnessError::Config("empty command template".to_string()))?;
    // Tool scratch files stay inside the workspace and vanish with it
    Ok(cmd
        .with_env("TMPDIR", workspace.path().to_string_lossy())
        .with_memory_limit_mb(memory_limit_mb))
}

fn runner_error(unit: &SourceUnit, stage: Stage, e: anyhow::Error, started: Instant) -> ExecutionResult {
    warn!("{}: runner failed during {}: {:#}", unit.identifier, stage, e);
    ExecutionResult::failed(
        unit,
        Some(stage),
        ExecutionFailure::RuntimeFailure {
            exit_code: None,
            signal: None,
        },
        format!("runner error: {:#}", e),
        started.elapsed(),
    )
}
