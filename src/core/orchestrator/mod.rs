//! Top-level pipeline: mode, credentials, dispatch, extraction.
//!
//! One [`InvocationRequest`] always yields exactly one [`RunResult`]. Nothing is
//! retried here; a user retries by re-invoking, which reuses the task id and so
//! lands in a fresh run directory under the same namespace.

use crate::core::backend::{EngineJob, ExecutionBackend, RunSource};
use crate::core::credentials::{CredentialResolver, VariableStore};
use crate::core::error::{AppError, ErrorReporter};
use crate::core::models::DEFAULT_MODEL;
use crate::core::request::InvocationRequest;
use crate::core::results_processor::{ResultExtractor, RunResult};
use crate::core::task_identity::TaskId;
use crate::core::types::{ErrorCategory, ExecutionMode, ModePreference};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelinePhase {
    ResolvingMode,
    ResolvingCredentials,
    Dispatching,
    Extracting,
    Done,
}

/// What happened during one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub result: RunResult,
    /// Phases entered, in order. Always ends with `Done`.
    pub phases: Vec<PipelinePhase>,
    pub mode: Option<ExecutionMode>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn entered(&self, phase: PipelinePhase) -> bool {
        self.phases.contains(&phase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub mode: ModePreference,
    /// Used when the request names no model; `None` makes a model mandatory.
    pub default_model: Option<String>,
    /// Hold a per-task lock across dispatch and extraction.
    pub serialize_per_task: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mode: ModePreference::Auto,
            default_model: Some(DEFAULT_MODEL.to_string()),
            serialize_per_task: false,
        }
    }
}

struct Trace {
    phases: Vec<PipelinePhase>,
    mode: Option<ExecutionMode>,
    started: Instant,
}

impl Trace {
    fn new() -> Self {
        Self {
            phases: Vec::new(),
            mode: None,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, phase: PipelinePhase) {
        tracing::debug!(?phase, "pipeline phase");
        self.phases.push(phase);
    }

    fn finish(mut self, result: RunResult) -> PipelineReport {
        self.enter(PipelinePhase::Done);
        PipelineReport {
            result,
            phases: self.phases,
            mode: self.mode,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

pub struct PatchOrchestrator {
    settings: OrchestratorSettings,
    container: Option<Arc<dyn ExecutionBackend>>,
    local: Option<Arc<dyn ExecutionBackend>>,
    local_repo: Option<PathBuf>,
    variables: Option<Arc<dyn VariableStore>>,
    extractor: ResultExtractor,
    reporter: Box<dyn ErrorReporter>,
    task_locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl PatchOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        extractor: ResultExtractor,
        reporter: Box<dyn ErrorReporter>,
    ) -> Self {
        PatchOrchestrator {
            settings,
            container: None,
            local: None,
            local_repo: None,
            variables: None,
            extractor,
            reporter,
            task_locks: DashMap::new(),
        }
    }

    /// Backend for multi-tenant runs.
    pub fn with_container_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.container = Some(backend);
        self
    }

    /// Backend for single-tenant runs against the checkout at `repo_path`.
    pub fn with_local_backend(
        mut self,
        backend: Arc<dyn ExecutionBackend>,
        repo_path: impl Into<PathBuf>,
    ) -> Self {
        self.local = Some(backend);
        self.local_repo = Some(repo_path.into());
        self
    }

    pub fn with_variable_store(mut self, store: Arc<dyn VariableStore>) -> Self {
        self.variables = Some(store);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the whole pipeline for one request.
    pub async fn run(&self, request: &InvocationRequest) -> PipelineReport {
        let task_id = request.task_id();
        let span = tracing::info_span!(
            "pipeline",
            task_id = %task_id,
            repository = %request.repository,
            issue = request.issue_number
        );
        self.run_inner(request, task_id).instrument(span).await
    }

    async fn run_inner(&self, request: &InvocationRequest, task_id: TaskId) -> PipelineReport {
        let mut trace = Trace::new();
        let model = self.effective_model(request);
        let model_label = model.clone().unwrap_or_default();

        trace.enter(PipelinePhase::ResolvingMode);
        let (mode, backend) = match self.resolve_mode().await {
            Ok(selected) => selected,
            Err(err) => {
                self.reporter.report_error(&err);
                return trace.finish(RunResult::from_error(&err, model_label));
            }
        };
        trace.mode = Some(mode);
        tracing::info!(%mode, backend = backend.name(), "execution mode resolved");

        trace.enter(PipelinePhase::ResolvingCredentials);
        let credentials = match CredentialResolver::resolve(
            model.as_deref(),
            mode,
            &request.repository,
            self.variables.as_deref(),
        )
        .await
        {
            Ok(credentials) => credentials,
            Err(err) => {
                let err = AppError::from(err);
                self.reporter
                    .report_warning(&err.diagnostic(), Some(task_id.to_string()));
                return trace.finish(RunResult::from_error(&err, model_label));
            }
        };

        let source = match self.run_source(mode, request) {
            Ok(source) => source,
            Err(err) => {
                self.reporter.report_error(&err);
                return trace.finish(RunResult::from_error(&err, model_label));
            }
        };

        let mut lock = self
            .settings
            .serialize_per_task
            .then(|| self.task_lock(&task_id));
        let guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        trace.enter(PipelinePhase::Dispatching);
        let issue_text = request.issue_text();
        let job = EngineJob {
            task_id: &task_id,
            model: &model_label,
            credentials: &credentials,
            source: &source,
            issue_text: Some(&issue_text),
        };
        let result = match backend.run(job).await {
            Ok(outcome) => {
                tracing::info!(
                    ran_to_completion = outcome.ran_to_completion,
                    exit_code = ?outcome.exit.code,
                    "engine finished"
                );
                trace.enter(PipelinePhase::Extracting);
                self.extractor
                    .extract(&backend.task_output_dir(&task_id), &task_id, &model_label)
            }
            Err(err) => {
                self.reporter.report_error(&err);
                RunResult::from_error(&err, model_label.clone())
            }
        };

        drop(guard);
        if lock.take().is_some() {
            self.task_locks
                .remove_if(&task_id, |_, lock| Arc::strong_count(lock) == 1);
        }

        if result.ok {
            tracing::info!(cost = ?result.cost, "run produced a result");
        } else {
            tracing::warn!(diagnostic = ?result.diagnostic, "run failed");
        }
        trace.finish(result)
    }

    fn effective_model(&self, request: &InvocationRequest) -> Option<String> {
        request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.default_model.clone())
    }

    /// Pick the execution mode and its backend.
    ///
    /// `Auto` prefers the container backend whenever its image is present.
    pub async fn resolve_mode(
        &self,
    ) -> Result<(ExecutionMode, Arc<dyn ExecutionBackend>), AppError> {
        let container = match &self.container {
            Some(backend) if backend.is_available().await => Some(backend.clone()),
            _ => None,
        };

        match (self.settings.mode, container, &self.local) {
            (ModePreference::Auto | ModePreference::App, Some(backend), _) => {
                Ok((ExecutionMode::App, backend))
            }
            (ModePreference::App, None, _) => Err(AppError::new(
                ErrorCategory::SetupError,
                "multi-tenant mode requested but the engine container image is not available",
            )
            .with_code("ORCH-001")),
            (ModePreference::Auto | ModePreference::Action, _, Some(local)) => {
                Ok((ExecutionMode::Action, local.clone()))
            }
            (_, _, None) => Err(AppError::new(
                ErrorCategory::SetupError,
                "no execution backend is configured for this host",
            )
            .with_code("ORCH-002")),
        }
    }

    fn run_source(
        &self,
        mode: ExecutionMode,
        request: &InvocationRequest,
    ) -> Result<RunSource, AppError> {
        match mode {
            ExecutionMode::App => Ok(RunSource::Remote {
                clone_url: request.clone_url.clone(),
                issue_url: request.issue_url.clone(),
            }),
            ExecutionMode::Action => match &self.local_repo {
                Some(path) => Ok(RunSource::Local {
                    repo_path: path.clone(),
                }),
                None => Err(AppError::new(
                    ErrorCategory::SetupError,
                    "single-tenant mode needs a target repository path",
                )
                .with_code("ORCH-003")),
            },
        }
    }

    fn task_lock(&self, task_id: &TaskId) -> Arc<Mutex<()>> {
        self.task_locks
            .entry(task_id.clone())
            .or_default()
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ExecutionOutcome;
    use crate::core::error::DefaultErrorReporter;
    use crate::core::request::RepositoryRef;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubBackend {
        root: PathBuf,
        available: bool,
        calls: AtomicUsize,
        name: &'static str,
    }

    impl StubBackend {
        fn new(root: &Path, available: bool, name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                root: root.to_path_buf(),
                available,
                calls: AtomicUsize::new(0),
                name,
            })
        }
    }

    #[async_trait]
    impl ExecutionBackend for StubBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn output_root(&self) -> &Path {
            &self.root
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn run(&self, job: EngineJob<'_>) -> Result<ExecutionOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(self.task_output_dir(job.task_id))?;
            Ok(ExecutionOutcome {
                ran_to_completion: true,
                exit: crate::core::backend::ExitInfo { code: Some(1) },
            })
        }
    }

    fn orchestrator(settings: OrchestratorSettings) -> PatchOrchestrator {
        PatchOrchestrator::new(
            settings,
            ResultExtractor::new(Box::new(DefaultErrorReporter::new())),
            Box::new(DefaultErrorReporter::new()),
        )
    }

    fn request(model: Option<&str>) -> InvocationRequest {
        InvocationRequest {
            issue_number: 5,
            issue_url: "https://github.com/octo/demo/issues/5".to_string(),
            issue_title: "Crash".to_string(),
            issue_body: "fix null pointer".to_string(),
            repository: RepositoryRef::new("octo", "demo"),
            clone_url: "https://github.com/octo/demo.git".to_string(),
            model: model.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn auto_prefers_available_container() {
        let root = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(OrchestratorSettings::default())
            .with_container_backend(StubBackend::new(root.path(), true, "container"))
            .with_local_backend(StubBackend::new(root.path(), true, "local"), "/repo");
        let (mode, backend) = orch.resolve_mode().await.unwrap();
        assert_eq!(mode, ExecutionMode::App);
        assert_eq!(backend.name(), "container");
    }

    #[tokio::test]
    async fn auto_falls_back_to_local_without_image() {
        let root = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(OrchestratorSettings::default())
            .with_container_backend(StubBackend::new(root.path(), false, "container"))
            .with_local_backend(StubBackend::new(root.path(), true, "local"), "/repo");
        let (mode, _) = orch.resolve_mode().await.unwrap();
        assert_eq!(mode, ExecutionMode::Action);
    }

    #[tokio::test]
    async fn explicit_app_without_image_is_setup_error() {
        let root = tempfile::TempDir::new().unwrap();
        let container = StubBackend::new(root.path(), false, "container");
        let orch = orchestrator(OrchestratorSettings {
            mode: ModePreference::App,
            ..OrchestratorSettings::default()
        })
        .with_container_backend(container.clone());

        let report = orch.run(&request(Some("gpt-4o-2024-08-06"))).await;
        assert!(!report.result.ok);
        assert_eq!(report.result.category, Some(ErrorCategory::SetupError));
        assert_eq!(
            report.phases,
            vec![PipelinePhase::ResolvingMode, PipelinePhase::Done]
        );
        assert_eq!(container.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_model_and_no_default_skips_dispatch() {
        let root = tempfile::TempDir::new().unwrap();
        let local = StubBackend::new(root.path(), true, "local");
        let orch = orchestrator(OrchestratorSettings {
            default_model: None,
            ..OrchestratorSettings::default()
        })
        .with_local_backend(local.clone(), "/repo");

        let report = orch.run(&request(None)).await;
        assert_eq!(
            report.result.category,
            Some(ErrorCategory::NoCredentialConfigured)
        );
        assert!(!report.entered(PipelinePhase::Dispatching));
        assert!(!report.entered(PipelinePhase::Extracting));
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_model_is_reported_to_user() {
        let root = tempfile::TempDir::new().unwrap();
        let orch = orchestrator(OrchestratorSettings::default())
            .with_local_backend(StubBackend::new(root.path(), true, "local"), "/repo");
        let report = orch.run(&request(Some("llama-3"))).await;
        assert_eq!(report.result.category, Some(ErrorCategory::UnknownModel));
        assert!(report.result.body.contains("llama-3"));
    }

    #[tokio::test]
    async fn serialized_runs_release_their_lock() {
        let root = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FixedStore("sk-test".to_string()));
        let container = StubBackend::new(root.path(), true, "container");
        let orch = orchestrator(OrchestratorSettings {
            serialize_per_task: true,
            ..OrchestratorSettings::default()
        })
        .with_container_backend(container.clone())
        .with_variable_store(store);

        let req = request(Some("gpt-4o-2024-08-06"));
        let (a, b) = tokio::join!(orch.run(&req), orch.run(&req));

        assert_eq!(container.calls.load(Ordering::SeqCst), 2);
        // the stub writes no run directory, so extraction finds nothing
        assert_eq!(a.result.category, Some(ErrorCategory::SetupError));
        assert!(b.entered(PipelinePhase::Extracting));
        assert!(orch.task_locks.is_empty());
    }

    /// Holds each run open for a while and records the peak overlap.
    struct SlowBackend {
        root: PathBuf,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "container"
        }

        fn output_root(&self) -> &Path {
            &self.root
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, _job: EngineJob<'_>) -> Result<ExecutionOutcome, AppError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecutionOutcome {
                ran_to_completion: true,
                exit: crate::core::backend::ExitInfo { code: Some(0) },
            })
        }
    }

    async fn peak_concurrency(serialize_per_task: bool) -> usize {
        let root = tempfile::TempDir::new().unwrap();
        let backend = Arc::new(SlowBackend {
            root: root.path().to_path_buf(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let orch = orchestrator(OrchestratorSettings {
            serialize_per_task,
            ..OrchestratorSettings::default()
        })
        .with_container_backend(backend.clone())
        .with_variable_store(Arc::new(FixedStore("sk-test".to_string())));

        let req = request(Some("gpt-4o-2024-08-06"));
        let (a, b, c) = tokio::join!(orch.run(&req), orch.run(&req), orch.run(&req));
        for report in [a, b, c] {
            assert!(report.entered(PipelinePhase::Extracting));
        }
        backend.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn serialized_runs_for_one_task_never_overlap() {
        assert_eq!(peak_concurrency(true).await, 1);
    }

    #[tokio::test]
    async fn unserialized_runs_for_one_task_overlap() {
        assert_eq!(peak_concurrency(false).await, 3);
    }

    struct FixedStore(String);

    #[async_trait]
    impl VariableStore for FixedStore {
        async fn read_variable(
            &self,
            _repository: &RepositoryRef,
            _name: &str,
        ) -> Result<Option<String>, AppError> {
            Ok(Some(self.0.clone()))
        }
    }
}
