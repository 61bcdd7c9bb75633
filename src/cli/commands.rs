use crate::{
    cli::args::{ExtractArgs, IssueArgs, PublishArgs, SolveArgs, TaskIdArgs},
    core::{
        backend::{ContainerBackend, DockerClient, LineSink, LocalProcessBackend, TracingLineSink},
        config::{ConfigLoader, PatchwrightConfig, CONFIG_FILE_NAME},
        git::PullRequestManager,
        github::GithubClient,
        orchestrator::PatchOrchestrator,
        publisher::{GitPublisher, PublishOutcome, PublishTarget, PullRequestService, WorkspaceSource},
        request::{InvocationRequest, RepositoryRef},
        results_processor::{render_comment, render_report, OutputFormat, ResultExtractor},
        task_identity::TaskId,
        types::ModePreference,
        AppError, DefaultErrorReporter,
    },
    Result,
};
use anyhow::{anyhow, Context};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Loaded configuration plus the workspace it was resolved against.
pub struct AppContext {
    pub workspace: PathBuf,
    pub config: PatchwrightConfig,
}

impl AppContext {
    pub fn load(workspace: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self> {
        let workspace = match workspace {
            Some(path) => path,
            None => env::current_dir().context("failed to read current directory")?,
        };
        let config_path = config_path.unwrap_or_else(|| workspace.join(CONFIG_FILE_NAME));
        let config = ConfigLoader::load(&config_path).map_err(app_error)?;
        Ok(Self { workspace, config })
    }

    /// Relative config paths are anchored at the workspace.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    fn output_root(&self) -> PathBuf {
        self.resolve(&self.config.engine.output_root)
    }

    fn api_token(&self) -> Option<&str> {
        self.config
            .github
            .token
            .as_deref()
            .or(self.config.github.installation_token.as_deref())
    }

    fn push_token(&self) -> Option<String> {
        self.config
            .github
            .installation_token
            .clone()
            .or_else(|| self.config.github.token.clone())
    }

    fn github_client(&self) -> Result<GithubClient> {
        GithubClient::new(
            &self.config.github.api_base,
            self.api_token(),
            self.config.github.request_timeout_ms,
        )
        .map_err(app_error)
    }
}

fn app_error(err: AppError) -> anyhow::Error {
    anyhow!(err)
}

fn parse_repository(target: &IssueArgs) -> Result<RepositoryRef> {
    target.repo.parse::<RepositoryRef>().map_err(app_error)
}

fn build_orchestrator(ctx: &AppContext, mode: Option<ModePreference>) -> Result<PatchOrchestrator> {
    let mut settings = ctx.config.orchestrator.settings().map_err(app_error)?;
    if let Some(mode) = mode {
        settings.mode = mode;
    }

    let engine = &ctx.config.engine;
    let sink: Arc<dyn LineSink> = Arc::new(TracingLineSink);
    let output_root = ctx.output_root();
    let extractor = ResultExtractor::new(Box::new(DefaultErrorReporter::new()));
    let mut orchestrator =
        PatchOrchestrator::new(settings, extractor, Box::new(DefaultErrorReporter::new()));

    let docker = Arc::new(DockerClient::new(engine.docker_program.clone()));
    let container = ContainerBackend::new(docker, engine.image.clone(), output_root.clone(), sink.clone())
        .with_contract(engine.contract())
        .with_container_output_dir(engine.container_output_dir.clone())
        .with_name_prefix(engine.container_name_prefix.clone());
    orchestrator = orchestrator.with_container_backend(Arc::new(container));

    match (&engine.code_dir, &ctx.config.repository.target_path) {
        (Some(code_dir), Some(target)) => {
            let local = LocalProcessBackend::new(ctx.resolve(code_dir), output_root, sink)
                .with_contract(engine.contract());
            orchestrator = orchestrator.with_local_backend(Arc::new(local), ctx.resolve(target));
        }
        (None, Some(_)) => {
            tracing::debug!("repository.target_path set without engine.code_dir; local backend disabled")
        }
        _ => {}
    }

    if ctx.api_token().is_some() {
        orchestrator = orchestrator.with_variable_store(Arc::new(ctx.github_client()?));
    }

    Ok(orchestrator)
}

fn read_issue_body(args: &SolveArgs) -> Result<String> {
    match (&args.body, &args.body_file) {
        (Some(body), _) => Ok(body.clone()),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read issue body from {}", path.display())),
        (None, None) => Ok(String::new()),
    }
}

pub async fn solve(ctx: &AppContext, args: SolveArgs) -> Result<()> {
    let repository = parse_repository(&args.target)?;
    let issue_body = read_issue_body(&args)?;
    let request = InvocationRequest {
        issue_number: args.target.issue,
        issue_url: args
            .issue_url
            .clone()
            .unwrap_or_else(|| args.target.default_issue_url()),
        issue_title: args.title.clone().unwrap_or_default(),
        issue_body,
        repository,
        clone_url: args
            .clone_url
            .clone()
            .unwrap_or_else(|| args.target.default_clone_url()),
        model: args.model.clone(),
    };

    let orchestrator = build_orchestrator(ctx, args.mode)?;
    let report = orchestrator.run(&request).await;

    let rendered = render_report(&report.result, OutputFormat::from(args.format)).map_err(app_error)?;
    println!("{}", rendered);

    if args.post_comment {
        let client = ctx.github_client()?;
        let comment = client
            .create_issue_comment(&request.repository, request.issue_number, &render_comment(&report.result))
            .await
            .map_err(app_error)?;
        tracing::info!(comment_id = comment.id, url = ?comment.html_url, "result posted");
    }

    if report.result.ok {
        Ok(())
    } else {
        Err(anyhow!(
            "run failed: {}",
            report.result.diagnostic.as_deref().unwrap_or("unknown failure")
        ))
    }
}

pub async fn publish(ctx: &AppContext, args: PublishArgs) -> Result<()> {
    let repository = parse_repository(&args.target)?;
    let client = Arc::new(ctx.github_client()?);
    let comments = client
        .list_issue_comments(&repository, args.target.issue)
        .await
        .map_err(app_error)?;

    let mode = match args.mode {
        Some(mode) => mode,
        None => ctx.config.orchestrator.mode_preference().map_err(app_error)?,
    };
    let persistent = match (mode, &ctx.config.repository.target_path) {
        (ModePreference::App, _) => None,
        (_, Some(path)) => Some(ctx.resolve(path)),
        (ModePreference::Action, None) => {
            return Err(anyhow!(
                "single-tenant publish needs repository.target_path (or TARGET_REPO_PATH)"
            ))
        }
        (ModePreference::Auto, None) => None,
    };

    let (source, pull_requests): (WorkspaceSource, Arc<dyn PullRequestService>) = match persistent {
        Some(path) => (
            WorkspaceSource::Persistent { path },
            Arc::new(PullRequestManager::new(ctx.config.github.gh_program.clone()))
                as Arc<dyn PullRequestService>,
        ),
        None => (
            WorkspaceSource::Ephemeral {
                clone_url: args
                    .clone_url
                    .clone()
                    .unwrap_or_else(|| args.target.default_clone_url()),
                push_token: ctx.push_token(),
            },
            client.clone() as Arc<dyn PullRequestService>,
        ),
    };

    let publisher = GitPublisher::new(ctx.config.publisher.settings(), pull_requests);
    let target = PublishTarget {
        repository: &repository,
        issue_number: args.target.issue,
        issue_title: args.title.as_deref(),
        source: &source,
    };

    let reply = match publisher.publish_latest(&comments, target).await {
        Ok(PublishOutcome::Opened(pr)) => {
            println!("{}", pr.url);
            format!("Opened pull request {} with the latest patch.", pr.url)
        }
        Ok(PublishOutcome::Declined { category, message }) => {
            println!("{}: {}", category, message);
            message
        }
        Err(err) => {
            if args.post_comment {
                let body = err
                    .recovery_suggestions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "The patch could not be published. Please check the workflow logs.".to_string());
                if let Err(post_err) = client
                    .create_issue_comment(&repository, args.target.issue, &body)
                    .await
                {
                    tracing::warn!(error = %post_err, "failed to post publish failure");
                }
            }
            return Err(app_error(err));
        }
    };

    if args.post_comment {
        client
            .create_issue_comment(&repository, args.target.issue, &reply)
            .await
            .map_err(app_error)?;
    }
    Ok(())
}

pub fn extract(ctx: &AppContext, args: ExtractArgs) -> Result<()> {
    let repository = parse_repository(&args.target)?;
    let task_id = TaskId::new(&repository.full_name(), args.target.issue);
    let output_root = args
        .output_root
        .clone()
        .map(|path| ctx.resolve(&path))
        .unwrap_or_else(|| ctx.output_root());

    let extractor = ResultExtractor::new(Box::new(DefaultErrorReporter::new()));
    let result = extractor.extract(&output_root.join(task_id.as_str()), &task_id, &args.model);

    if args.as_comment {
        println!("{}", render_comment(&result));
    } else {
        let rendered = render_report(&result, OutputFormat::from(args.format)).map_err(app_error)?;
        println!("{}", rendered);
    }
    Ok(())
}

pub fn task_id(args: TaskIdArgs) -> Result<()> {
    let repository = parse_repository(&args.target)?;
    println!("{}", TaskId::new(&repository.full_name(), args.target.issue));
    Ok(())
}
