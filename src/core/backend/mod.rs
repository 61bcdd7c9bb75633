#![allow(clippy::result_large_err)]

//! Execution backends for the external analysis engine.
//!
//! Both backends share one contract: pre-create `{output_root}/{task_id}`, launch
//! the engine with the fixed argument layout, stream its output line by line and
//! report how the process ended. Whether the run was useful is decided later by
//! the results processor from what landed on disk.

pub mod container;
pub mod local;

pub use container::{ContainerBackend, DockerClient};
pub use local::LocalProcessBackend;

use crate::core::credentials::Credentials;
use crate::core::error::AppError;
use crate::core::task_identity::TaskId;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Where the engine gets the code to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSource {
    /// Container mode: the engine clones the repository itself.
    Remote { clone_url: String, issue_url: String },
    /// Local mode: the engine works on an existing checkout.
    Local { repo_path: PathBuf },
}

/// Everything a backend needs for one engine run.
#[derive(Debug, Clone, Copy)]
pub struct EngineJob<'a> {
    pub task_id: &'a TaskId,
    pub model: &'a str,
    pub credentials: &'a Credentials,
    pub source: &'a RunSource,
    pub issue_text: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        ExitInfo {
            code: status.code(),
        }
    }
}

/// How an engine process ended. A nonzero exit is a signal, not a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub ran_to_completion: bool,
    pub exit: ExitInfo,
}

impl ExecutionOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        let exit = ExitInfo::from(status);
        ExecutionOutcome {
            ran_to_completion: exit.code.is_some(),
            exit,
        }
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Host directory that holds one `{task_id}` namespace per task.
    fn output_root(&self) -> &Path;

    /// Whether the backend can be selected at all on this host.
    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, job: EngineJob<'_>) -> Result<ExecutionOutcome, AppError>;

    fn task_output_dir(&self, task_id: &TaskId) -> PathBuf {
        self.output_root().join(task_id.as_str())
    }
}

/// Fixed parts of the engine command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineContract {
    pub interpreter: String,
    pub entry_point: String,
    pub setup_dir: String,
}

impl Default for EngineContract {
    fn default() -> Self {
        EngineContract {
            interpreter: "python".to_string(),
            entry_point: "app/main.py".to_string(),
            setup_dir: "setup".to_string(),
        }
    }
}

impl EngineContract {
    /// Full command (interpreter first) for a run writing into `output_dir`.
    ///
    /// Remote sources use the issue-link form, local sources the issue-file form.
    pub fn command_line(
        &self,
        output_dir: &str,
        model: &str,
        task_id: &TaskId,
        source: EngineSource<'_>,
    ) -> Vec<String> {
        let mut cmd = vec![self.interpreter.clone(), self.entry_point.clone()];
        match source {
            EngineSource::Remote {
                clone_url,
                issue_url,
            } => {
                cmd.extend(
                    [
                        "github-issue",
                        "--output-dir",
                        output_dir,
                        "--setup-dir",
                        self.setup_dir.as_str(),
                        "--model",
                        model,
                        "--task-id",
                        task_id.as_str(),
                        "--clone-link",
                        clone_url,
                        "--issue-link",
                        issue_url,
                    ]
                    .map(str::to_string),
                );
            }
            EngineSource::Local {
                repo_path,
                issue_file,
            } => {
                cmd.extend(
                    [
                        "local-issue",
                        "--output-dir",
                        output_dir,
                        "--model",
                        model,
                        "--task-id",
                        task_id.as_str(),
                        "--local-repo",
                        repo_path,
                        "--issue-file",
                        issue_file,
                    ]
                    .map(str::to_string),
                );
            }
        }
        cmd
    }
}

/// Source arguments as they appear on the engine command line.
#[derive(Debug, Clone, Copy)]
pub enum EngineSource<'a> {
    Remote { clone_url: &'a str, issue_url: &'a str },
    Local { repo_path: &'a str, issue_file: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Receives engine output as it is produced.
pub trait LineSink: Send + Sync {
    fn line(&self, task_id: &TaskId, stream: StreamKind, line: &str);
}

/// Default sink: one tracing event per line.
pub struct TracingLineSink;

impl LineSink for TracingLineSink {
    fn line(&self, task_id: &TaskId, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => {
                tracing::info!(task_id = %task_id, stream = stream.as_str(), "{}", line)
            }
            StreamKind::Stderr => {
                tracing::warn!(task_id = %task_id, stream = stream.as_str(), "{}", line)
            }
        }
    }
}

/// Create `{output_root}/{task_id}` so there is always something to scan.
pub fn prepare_output_dir(output_root: &Path, task_id: &TaskId) -> Result<PathBuf, AppError> {
    let dir = output_root.join(task_id.as_str());
    std::fs::create_dir_all(&dir).map_err(|err| {
        AppError::new(
            ErrorCategory::SetupError,
            format!(
                "failed to create output directory {}: {}",
                dir.display(),
                err
            ),
        )
        .with_code("BACKEND-003")
    })?;
    Ok(dir)
}

/// Set engine variables on `cmd`, removing any inherited value of the same name
/// first so the resolved value (even an empty one) is what the child sees.
pub fn apply_engine_env<'a, I>(cmd: &mut Command, vars: I)
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    for (name, value) in vars {
        cmd.env_remove(name);
        cmd.env(name, value);
    }
}

/// Forward a child's stdout/stderr to `sink` until it exits.
pub async fn stream_to_completion(
    mut child: Child,
    task_id: &TaskId,
    sink: Arc<dyn LineSink>,
) -> Result<ExitStatus, AppError> {
    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(forward_lines(
            stdout,
            task_id.clone(),
            StreamKind::Stdout,
            sink.clone(),
        ))
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(forward_lines(
            stderr,
            task_id.clone(),
            StreamKind::Stderr,
            sink.clone(),
        ))
    });

    let status = child.wait().await.map_err(|err| {
        AppError::new(
            ErrorCategory::ToolExecutionError,
            format!("failed to wait for engine process: {}", err),
        )
        .with_code("BACKEND-004")
    })?;

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = task.await;
    }

    Ok(status)
}

async fn forward_lines<R>(reader: R, task_id: TaskId, stream: StreamKind, sink: Arc<dyn LineSink>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.line(&task_id, stream, line.trim_end_matches('\r'));
    }
}
