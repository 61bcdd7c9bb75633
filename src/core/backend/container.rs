#![allow(clippy::result_large_err)]

use super::{
    apply_engine_env, prepare_output_dir, stream_to_completion, EngineContract, EngineJob,
    EngineSource, ExecutionBackend, ExecutionOutcome, LineSink, RunSource,
};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Thin wrapper over the `docker` command line client.
///
/// Constructed once at startup and shared; nothing in this module reaches for a
/// process-global daemon handle.
#[derive(Debug, Clone)]
pub struct DockerClient {
    program: PathBuf,
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn command(&self) -> Command {
        Command::new(&self.program)
    }

    /// True when `image` exists locally. A missing docker binary counts as absent.
    pub async fn image_exists(&self, image: &str) -> bool {
        let status = self
            .command()
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(err) => {
                tracing::debug!(image, error = %err, "docker not usable");
                false
            }
        }
    }

    /// Force-remove a container; a container that does not exist is not an error.
    pub async fn remove_container(&self, name: &str) -> Result<(), AppError> {
        let output = self
            .command()
            .args(["rm", "-f", name])
            .output()
            .await
            .map_err(|err| {
                AppError::new(
                    ErrorCategory::ToolExecutionError,
                    format!("failed to run docker rm: {}", err),
                )
                .with_code("BACKEND-005")
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(AppError::new(
            ErrorCategory::ToolExecutionError,
            format!("docker rm -f {} failed: {}", name, stderr.trim()),
        )
        .with_code("BACKEND-005"))
    }
}

/// Runs the engine inside a fresh container per task.
pub struct ContainerBackend {
    docker: Arc<DockerClient>,
    image: String,
    name_prefix: String,
    host_output_root: PathBuf,
    container_output_dir: String,
    contract: EngineContract,
    sink: Arc<dyn LineSink>,
}

impl ContainerBackend {
    pub fn new(
        docker: Arc<DockerClient>,
        image: impl Into<String>,
        host_output_root: impl Into<PathBuf>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Self {
            docker,
            image: image.into(),
            name_prefix: "patchwright".to_string(),
            host_output_root: host_output_root.into(),
            container_output_dir: "/output".to_string(),
            contract: EngineContract::default(),
            sink,
        }
    }

    pub fn with_contract(mut self, contract: EngineContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_container_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.container_output_dir = dir.into();
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Arguments passed to `docker`, secrets excluded.
    ///
    /// Credential variables are forwarded by name only (`-e NAME`); their values
    /// live in the docker client's own environment so they never show up in a
    /// process listing.
    pub fn docker_args(
        &self,
        container_name: &str,
        host_task_dir: &Path,
        job: &EngineJob<'_>,
        clone_url: &str,
        issue_url: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "-v".to_string(),
            format!(
                "{}:{}",
                host_task_dir.display(),
                self.container_output_dir
            ),
        ];
        for (name, _) in job.credentials.engine_env() {
            args.push("-e".to_string());
            args.push(name.to_string());
        }
        args.push("-e".to_string());
        args.push("PYTHONPATH=.".to_string());
        args.push(self.image.clone());
        args.extend(self.contract.command_line(
            &self.container_output_dir,
            job.model,
            job.task_id,
            EngineSource::Remote {
                clone_url,
                issue_url,
            },
        ));
        args
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        "container"
    }

    fn output_root(&self) -> &Path {
        &self.host_output_root
    }

    async fn is_available(&self) -> bool {
        self.docker.image_exists(&self.image).await
    }

    async fn run(&self, job: EngineJob<'_>) -> Result<ExecutionOutcome, AppError> {
        let (clone_url, issue_url) = match job.source {
            RunSource::Remote {
                clone_url,
                issue_url,
            } => (clone_url.as_str(), issue_url.as_str()),
            RunSource::Local { .. } => {
                return Err(AppError::new(
                    ErrorCategory::SetupError,
                    "container backend needs a clone URL and an issue link",
                )
                .with_code("BACKEND-002"))
            }
        };

        let host_task_dir = prepare_output_dir(&self.host_output_root, job.task_id)?;
        let container_name = job.task_id.container_name(&self.name_prefix);

        // A container left over from an interrupted run would block `--name`.
        if let Err(err) = self.docker.remove_container(&container_name).await {
            tracing::warn!(container = %container_name, error = %err, "could not remove stale container");
        }

        let mut cmd = self.docker.command();
        cmd.args(self.docker_args(&container_name, &host_task_dir, &job, clone_url, issue_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_engine_env(&mut cmd, job.credentials.engine_env());

        tracing::info!(
            task_id = %job.task_id,
            container = %container_name,
            image = %self.image,
            model = job.model,
            "starting engine container"
        );

        let child = cmd.spawn().map_err(|err| {
            AppError::new(
                ErrorCategory::SetupError,
                format!(
                    "failed to launch {}: {}",
                    self.docker.program().display(),
                    err
                ),
            )
            .with_code("BACKEND-001")
        })?;

        let status = stream_to_completion(child, job.task_id, self.sink.clone()).await;

        if let Err(err) = self.docker.remove_container(&container_name).await {
            tracing::warn!(container = %container_name, error = %err, "could not remove container after run");
        }

        let outcome = ExecutionOutcome::from_status(status?);
        if !outcome.exit.success() {
            tracing::warn!(
                task_id = %job.task_id,
                exit_code = ?outcome.exit.code,
                "engine container exited unsuccessfully"
            );
        }
        Ok(outcome)
    }
}
