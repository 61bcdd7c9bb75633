#![allow(clippy::result_large_err)]

use super::{
    apply_engine_env, prepare_output_dir, stream_to_completion, EngineContract, EngineJob,
    EngineSource, ExecutionBackend, ExecutionOutcome, LineSink, RunSource,
};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Runs the engine as a child process on the host, against an existing checkout.
pub struct LocalProcessBackend {
    code_dir: PathBuf,
    output_root: PathBuf,
    contract: EngineContract,
    sink: Arc<dyn LineSink>,
}

impl LocalProcessBackend {
    pub fn new(
        code_dir: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Self {
            code_dir: code_dir.into(),
            output_root: output_root.into(),
            contract: EngineContract::default(),
            sink,
        }
    }

    pub fn with_contract(mut self, contract: EngineContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn code_dir(&self) -> &Path {
        &self.code_dir
    }

    fn write_issue_file(&self, text: &str) -> Result<tempfile::NamedTempFile, AppError> {
        let setup_err = |err: std::io::Error| {
            AppError::new(
                ErrorCategory::SetupError,
                format!("failed to write issue file: {}", err),
            )
            .with_code("BACKEND-006")
        };
        let mut file = tempfile::Builder::new()
            .prefix("issue-")
            .suffix(".txt")
            .tempfile()
            .map_err(setup_err)?;
        file.write_all(text.as_bytes()).map_err(setup_err)?;
        file.flush().map_err(setup_err)?;
        Ok(file)
    }
}

#[async_trait]
impl ExecutionBackend for LocalProcessBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn output_root(&self) -> &Path {
        &self.output_root
    }

    async fn run(&self, job: EngineJob<'_>) -> Result<ExecutionOutcome, AppError> {
        let repo_path = match job.source {
            RunSource::Local { repo_path } => repo_path,
            RunSource::Remote { .. } => {
                return Err(AppError::new(
                    ErrorCategory::SetupError,
                    "local backend needs a checked-out repository path",
                )
                .with_code("BACKEND-002"))
            }
        };

        let task_dir = prepare_output_dir(&self.output_root, job.task_id)?;
        // Kept alive until the child exits; removed on drop.
        let issue_file = self.write_issue_file(job.issue_text.unwrap_or_default())?;

        let task_dir_arg = task_dir.to_string_lossy();
        let repo_arg = repo_path.to_string_lossy();
        let issue_arg = issue_file.path().to_string_lossy();
        let command_line = self.contract.command_line(
            &task_dir_arg,
            job.model,
            job.task_id,
            EngineSource::Local {
                repo_path: &repo_arg,
                issue_file: &issue_arg,
            },
        );
        let (program, args) = match command_line.split_first() {
            Some(split) => split,
            None => {
                return Err(AppError::new(
                    ErrorCategory::SetupError,
                    "engine command line is empty",
                )
                .with_code("BACKEND-002"))
            }
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.code_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_engine_env(
            &mut cmd,
            std::iter::once(("PYTHONPATH", self.code_dir.to_string_lossy().into_owned()))
                .chain(job.credentials.engine_env()),
        );

        tracing::info!(
            task_id = %job.task_id,
            code_dir = %self.code_dir.display(),
            repo = %repo_path.display(),
            model = job.model,
            "starting engine process"
        );

        let child = cmd.spawn().map_err(|err| {
            AppError::new(
                ErrorCategory::SetupError,
                format!("failed to launch engine '{}': {}", program, err),
            )
            .with_code("BACKEND-001")
        })?;

        let status = stream_to_completion(child, job.task_id, self.sink.clone()).await?;
        drop(issue_file);

        let outcome = ExecutionOutcome::from_status(status);
        if !outcome.exit.success() {
            tracing::warn!(
                task_id = %job.task_id,
                exit_code = ?outcome.exit.code,
                "engine process exited unsuccessfully"
            );
        }
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::backend::{StreamKind, TracingLineSink};
    use crate::core::credentials::Credentials;
    use crate::core::models::Provider;
    use crate::core::task_identity::TaskId;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<(StreamKind, String)>>);

    impl LineSink for CollectingSink {
        fn line(&self, _task_id: &TaskId, stream: StreamKind, line: &str) {
            self.0.lock().unwrap().push((stream, line.to_string()));
        }
    }

    /// Engine stand-in: records its issue text and environment into the output dir.
    fn fake_engine(code_dir: &Path) {
        let script = r#"#!/bin/sh
out=""; issue=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-dir) out="$2"; shift 2;;
    --issue-file) issue="$2"; shift 2;;
    *) shift;;
  esac
done
cat "$issue" > "$out/seen_issue.txt"
printf 'OPENAI_KEY=%s\nANTHROPIC_API_KEY=%s\nPYTHONPATH=%s\n' "$OPENAI_KEY" "$ANTHROPIC_API_KEY" "$PYTHONPATH" > "$out/seen_env.txt"
echo "engine started"
echo "warning line" >&2
exit 3
"#;
        let path = code_dir.join("engine.sh");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn contract() -> EngineContract {
        EngineContract {
            interpreter: "sh".to_string(),
            entry_point: "engine.sh".to_string(),
            setup_dir: "setup".to_string(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn runs_engine_with_isolated_credentials() {
        let code = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fake_engine(code.path());
        std::env::set_var("OPENAI_KEY", "host-leak");

        let sink = Arc::new(CollectingSink::default());
        let backend =
            LocalProcessBackend::new(code.path(), out.path(), sink.clone()).with_contract(contract());
        let task = TaskId::new("octo/demo", 9);
        let creds = Credentials::new(Provider::Anthropic, "sk-ant");
        let source = RunSource::Local {
            repo_path: PathBuf::from("/repo"),
        };

        let outcome = backend
            .run(EngineJob {
                task_id: &task,
                model: "claude-3-opus-20240229",
                credentials: &creds,
                source: &source,
                issue_text: Some("fix null pointer"),
            })
            .await
            .unwrap();
        std::env::remove_var("OPENAI_KEY");

        assert!(outcome.ran_to_completion);
        assert_eq!(outcome.exit.code, Some(3));

        let task_dir = out.path().join(task.as_str());
        assert_eq!(
            std::fs::read_to_string(task_dir.join("seen_issue.txt")).unwrap(),
            "fix null pointer"
        );
        let env = std::fs::read_to_string(task_dir.join("seen_env.txt")).unwrap();
        assert!(env.contains("OPENAI_KEY=\n"));
        assert!(env.contains("ANTHROPIC_API_KEY=sk-ant\n"));
        assert!(env.contains(&format!("PYTHONPATH={}\n", code.path().display())));

        let lines = sink.0.lock().unwrap();
        assert!(lines.contains(&(StreamKind::Stdout, "engine started".to_string())));
        assert!(lines.contains(&(StreamKind::Stderr, "warning line".to_string())));
    }

    #[tokio::test]
    async fn missing_interpreter_is_setup_error() {
        let code = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let backend = LocalProcessBackend::new(code.path(), out.path(), Arc::new(TracingLineSink))
            .with_contract(EngineContract {
                interpreter: "/nonexistent/interpreter".to_string(),
                ..contract()
            });
        let task = TaskId::new("octo/demo", 1);
        let creds = Credentials::new(Provider::OpenAi, "sk");
        let source = RunSource::Local {
            repo_path: PathBuf::from("/repo"),
        };
        let err = backend
            .run(EngineJob {
                task_id: &task,
                model: "m",
                credentials: &creds,
                source: &source,
                issue_text: Some("x"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::SetupError);
        assert!(out.path().join(task.as_str()).is_dir());
    }
}
