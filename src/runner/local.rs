//! Local runner implementation
//!
//! Executes a toolchain command directly on the host with a wall-clock
//! deadline. The child leads its own process group, and that group is killed
//! when the run ends, whether the child exited or timed out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, ProcessOutput, RunOutcome, Runner};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runner that spawns processes on the local host
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(cmd: &CommandSpec, work_dir: &Path) -> Command {
        let mut std_cmd = std::process::Command::new(&cmd.program);
        std_cmd
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let memory_limit_bytes = cmd.memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024));
        // SAFETY: only async-signal-safe setrlimit calls run between fork and exec.
        unsafe {
            std_cmd.pre_exec(move || {
                setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
                if let Some(bytes) = memory_limit_bytes {
                    setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
                }
                Ok(())
            });
        }

        let mut command = Command::from(std_cmd);
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<RunOutcome> {
        debug!(
            "Running {:?} in {:?} (timeout {:?})",
            cmd.to_vec(),
            work_dir,
            timeout
        );

        let started = Instant::now();
        let mut child = match Self::build_command(cmd, work_dir).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", cmd.program, e);
                return Ok(RunOutcome::ToolchainUnavailable {
                    program: cmd.program.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let pid = child.id();
        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        // Only the direct child is under the deadline; background children
        // holding the pipes open must not turn a finished run into a timeout
        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let elapsed = started.elapsed();

        // Nothing the program forked may outlive the run
        kill_group(pid);

        match waited {
            Ok(status) => {
                let status =
                    status.with_context(|| format!("Failed to wait for {}", cmd.program))?;
                debug!(
                    "{} exited with {:?} after {:?}",
                    cmd.program,
                    status.code(),
                    elapsed
                );

                let stdout = drain_pipe(stdout, "stdout").await?;
                let stderr = drain_pipe(stderr, "stderr").await?;

                Ok(RunOutcome::Completed(ProcessOutput {
                    stdout: String::from_utf8_lossy(&stdout).to_string(),
                    stderr: String::from_utf8_lossy(&stderr).to_string(),
                    exit_code: status.code(),
                    signal: status.signal(),
                    elapsed,
                }))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out child: {}", e);
                }
                stdout.abort();
                stderr.abort();
                warn!(
                    "{} exceeded {:?} and was killed after {:?}",
                    cmd.program, timeout, elapsed
                );
                Ok(RunOutcome::TimedOut {
                    limit: timeout,
                    elapsed,
                })
            }
        }
    }
}

/// SIGKILL the child's process group; ESRCH means it is already gone
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!("killpg({}) failed: {}", pid, e),
        }
    }
}

/// Collect a pipe reader once the process group is dead.
///
/// A descendant that left the group can still hold the write end; give up
/// after `DRAIN_TIMEOUT` instead of hanging.
async fn drain_pipe(reader: JoinHandle<std::io::Result<Vec<u8>>>, name: &str) -> Result<Vec<u8>> {
    let abort = reader.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
        Ok(joined) => {
            let read = joined.with_context(|| format!("{} reader failed", name))?;
            Ok(read.with_context(|| format!("Failed to read {}", name))?)
        }
        Err(_) => {
            abort.abort();
            warn!("{} still open {:?} after exit, output dropped", name, DRAIN_TIMEOUT);
            Ok(Vec::new())
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
