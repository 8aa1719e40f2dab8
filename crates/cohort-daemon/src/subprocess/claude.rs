//! [`SessionExecutor`] backed by the `claude` CLI.
//!
//! Each group session becomes one headless `claude -p` process:
//! - a permit from the shared [`ProcessPool`] is held for the process lifetime
//! - stdout is read as stream-json NDJSON; the final `result` line supplies
//!   success and cost
//! - stderr is logged and its last line kept for error messages
//! - cancellation sends SIGTERM, waits the terminate timeout, then SIGKILLs

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cohort_core::group::PermissionMode;
use cohort_core::ndjson::{self, Message, SessionResult};

use super::pool::{PoolEntry, ProcessPool};
use crate::orchestration::{ExecutionRequest, ExecutorError, SessionExecutor, SessionOutcome};

/// Default grace period after SIGTERM before SIGKILL.
const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the stdout reader saw.
#[derive(Debug, Default)]
struct StreamSummary {
    result: Option<SessionResult>,
    last_text: Option<String>,
}

/// Runs group sessions as Claude Code subprocesses.
pub struct ClaudeExecutor {
    claude_bin: PathBuf,
    pool: Arc<ProcessPool>,
    terminate_timeout: Duration,
}

impl ClaudeExecutor {
    pub fn new(claude_bin: PathBuf, pool: Arc<ProcessPool>) -> Self {
        Self {
            claude_bin,
            pool,
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    /// Build the `claude` invocation for a request.
    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.claude_bin);
        cmd.current_dir(&request.project_path)
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--session-id")
            .arg(&request.claude_session_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref parent) = request.resume_from {
            cmd.arg("--resume").arg(parent).arg("--fork-session");
        }
        if let Some(ref model) = request.config.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(max_turns) = request.config.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        if request.config.permission_mode != PermissionMode::Default {
            cmd.arg("--permission-mode")
                .arg(request.config.permission_mode.as_cli_arg());
        }
        cmd
    }

    async fn supervise(
        &self,
        request: &ExecutionRequest,
        mut child: Child,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, ExecutorError> {
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| read_stdout(request.session_id.clone(), stdout));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| read_stderr(request.session_id.clone(), stderr));

        let status = tokio::select! {
            status = child.wait() => status?,
            () = cancel.cancelled() => {
                info!(group_id = %request.group_id, session_id = %request.session_id, "Cancelling claude subprocess");
                terminate_process(&mut child, self.terminate_timeout).await;
                let summary = join_stdout(stdout_task).await;
                let cost_usd = summary
                    .result
                    .and_then(|r| r.cost_usd)
                    .unwrap_or(0.0);
                return Err(ExecutorError::Cancelled { cost_usd });
            }
        };

        let summary = join_stdout(stdout_task).await;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };

        debug!(
            session_id = %request.session_id,
            exit_code = ?status.code(),
            has_result = summary.result.is_some(),
            "claude subprocess exited"
        );

        Ok(outcome_from(summary, status.success(), status.code(), stderr_tail))
    }
}

#[async_trait]
impl SessionExecutor for ClaudeExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, ExecutorError> {
        let _permit = tokio::select! {
            permit = self.pool.acquire() => permit.map_err(|e| ExecutorError::Spawn { reason: e.to_string() })?,
            () = cancel.cancelled() => return Err(ExecutorError::Cancelled { cost_usd: 0.0 }),
        };

        if !request.project_path.is_dir() {
            return Err(ExecutorError::Spawn {
                reason: format!(
                    "project path {} is not a directory",
                    request.project_path.display()
                ),
            });
        }

        let mut cmd = self.build_command(&request);
        info!(
            group_id = %request.group_id,
            session_id = %request.session_id,
            claude_session_id = %request.claude_session_id,
            resume_from = ?request.resume_from,
            model = ?request.config.model,
            working_dir = %request.project_path.display(),
            "Spawning claude subprocess"
        );
        let child = cmd.spawn().map_err(|e| ExecutorError::Spawn {
            reason: e.to_string(),
        })?;

        self.pool
            .register(PoolEntry {
                group_id: request.group_id.clone(),
                session_id: request.session_id.clone(),
                pid: child.id(),
            })
            .await;
        let active = self.pool.active_count().await;
        debug!(
            session_id = %request.session_id,
            active,
            max_processes = self.pool.max_processes(),
            "claude subprocess registered in pool"
        );
        let result = self.supervise(&request, child, &cancel).await;
        self.pool
            .unregister(&request.group_id, &request.session_id)
            .await;
        result
    }
}

fn read_stdout(session_id: String, stdout: ChildStdout) -> JoinHandle<StreamSummary> {
    tokio::spawn(async move {
        let mut summary = StreamSummary::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match ndjson::parse_line(&line) {
                Ok(Message::SystemInit(init)) => {
                    debug!(%session_id, claude_session_id = %init.session_id, model = %init.model, "claude session initialised");
                }
                Ok(Message::Assistant(msg)) if !msg.text.is_empty() => {
                    summary.last_text = Some(msg.joined());
                }
                Ok(Message::Result(result)) => summary.result = Some(result),
                Ok(_) => {}
                Err(e) => debug!(%session_id, error = %e, "Unparseable stdout line"),
            }
        }
        summary
    })
}

fn read_stderr(session_id: String, stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut last = None;
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            warn!(%session_id, "stderr: {}", line);
            last = Some(line);
        }
        last
    })
}

async fn join_stdout(task: Option<JoinHandle<StreamSummary>>) -> StreamSummary {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => StreamSummary::default(),
    }
}

/// Turn what the process reported into a session outcome.
fn outcome_from(
    summary: StreamSummary,
    exited_ok: bool,
    exit_code: Option<i32>,
    stderr_tail: Option<String>,
) -> SessionOutcome {
    match summary.result {
        Some(result) => {
            let cost = result.cost_usd.unwrap_or(0.0);
            if result.succeeded() {
                SessionOutcome::succeeded(cost)
            } else {
                let error = result
                    .result
                    .filter(|r| !r.is_empty())
                    .or(summary.last_text)
                    .unwrap_or_else(|| format!("claude reported {:?}", result.subtype));
                SessionOutcome::failed(cost, error)
            }
        }
        None if exited_ok => SessionOutcome::failed(0.0, "claude exited without a result"),
        None => {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let error = match stderr_tail {
                Some(tail) => format!("claude exited with {code}: {tail}"),
                None => format!("claude exited with {code}"),
            };
            SessionOutcome::failed(0.0, error)
        }
    }
}

/// Terminate a process: SIGTERM, wait the grace period, then SIGKILL.
async fn terminate_process(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid comes from our own Child handle, which has not been reaped.
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("Grace period expired, sending SIGKILL");
        let _ = child.kill().await;
    }
}
