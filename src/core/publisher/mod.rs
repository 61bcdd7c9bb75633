#![allow(clippy::result_large_err)]

//! Turning a located patch into a pushed branch and an open pull request.

use crate::core::conversation::{locate_latest_patch, Comment, PatchLocateError};
use crate::core::error::AppError;
use crate::core::git::{authenticated_url, CommitIdentity, GitManager};
use crate::core::request::RepositoryRef;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything needed to open one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestDraft {
    pub repository: RepositoryRef,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: Option<u64>,
    pub url: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait PullRequestService: Send + Sync {
    /// Open a pull request for a branch that was already pushed from `workspace`.
    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
        workspace: &Path,
    ) -> Result<PullRequestRef, AppError>;
}

/// Where the publish workspace comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum WorkspaceSource {
    /// Single-tenant: an existing checkout, pushed through its default remote.
    Persistent { path: PathBuf },
    /// Multi-tenant: a fresh clone per publish, pushed with a short-lived token.
    Ephemeral {
        clone_url: String,
        push_token: Option<String>,
    },
}

impl std::fmt::Debug for WorkspaceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceSource::Persistent { path } => f
                .debug_struct("Persistent")
                .field("path", path)
                .finish(),
            WorkspaceSource::Ephemeral {
                clone_url,
                push_token,
            } => f
                .debug_struct("Ephemeral")
                .field("clone_url", clone_url)
                .field("push_token", &push_token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSettings {
    pub identity: CommitIdentity,
    pub branch_prefix: String,
    /// Remote used by single-tenant pushes and token-less ephemeral pushes.
    pub default_remote: String,
    /// Name of the temporary remote carrying the push token.
    pub push_remote: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            identity: CommitIdentity::default(),
            branch_prefix: "patchwright/issue".to_string(),
            default_remote: "origin".to_string(),
            push_remote: "patchwright-push".to_string(),
        }
    }
}

/// What the caller asked to publish.
#[derive(Debug, Clone)]
pub struct PublishTarget<'a> {
    pub repository: &'a RepositoryRef,
    pub issue_number: u64,
    pub issue_title: Option<&'a str>,
    pub source: &'a WorkspaceSource,
}

/// Result of a conversation-driven publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Opened(PullRequestRef),
    /// No usable patch; `message` is the reply for the conversation.
    Declined {
        category: ErrorCategory,
        message: String,
    },
}

pub fn pull_request_title(issue_number: u64, issue_title: Option<&str>) -> String {
    match issue_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("Patch for issue #{} - {}", issue_number, title),
        None => format!("Patch for issue #{}", issue_number),
    }
}

pub fn pull_request_body(issue_number: u64) -> String {
    format!(
        "This PR contains a patch for issue #{}. The patch was generated by Patchwright; please review it before merging.",
        issue_number
    )
}

pub fn commit_message(issue_number: u64) -> String {
    format!("Patch for issue #{}", issue_number)
}

struct PreparedBranch {
    head: String,
    base: String,
}

pub struct GitPublisher {
    settings: PublisherSettings,
    pull_requests: Arc<dyn PullRequestService>,
}

impl GitPublisher {
    pub fn new(settings: PublisherSettings, pull_requests: Arc<dyn PullRequestService>) -> Self {
        Self {
            settings,
            pull_requests,
        }
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Locate the latest patch in `comments` and publish it.
    ///
    /// A missing or malformed patch is not an error: it comes back as
    /// [`PublishOutcome::Declined`] and no git command is run.
    pub async fn publish_latest(
        &self,
        comments: &[Comment],
        target: PublishTarget<'_>,
    ) -> Result<PublishOutcome, AppError> {
        let patch = match locate_latest_patch(comments) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::info!(
                    repository = %target.repository,
                    issue = target.issue_number,
                    reason = %err,
                    "nothing to publish"
                );
                return Ok(declined(err));
            }
        };
        self.publish(&patch, target).await.map(PublishOutcome::Opened)
    }

    /// Apply `patch` on a new branch, push it and open a pull request.
    pub async fn publish(
        &self,
        patch: &str,
        target: PublishTarget<'_>,
    ) -> Result<PullRequestRef, AppError> {
        // `_ephemeral` is dropped on every return path, which removes a fresh clone.
        let (workspace, _ephemeral) = match target.source {
            WorkspaceSource::Persistent { path } => (path.clone(), None),
            WorkspaceSource::Ephemeral { .. } => {
                let dir = tempfile::Builder::new()
                    .prefix("patchwright-publish-")
                    .tempdir()
                    .map_err(|e| {
                        AppError::new(
                            ErrorCategory::IoError,
                            format!("Failed to create publish workspace: {}", e),
                        )
                        .with_code("PUB-001")
                    })?;
                (dir.path().join("repo"), Some(dir))
            }
        };

        let settings = self.settings.clone();
        let source = target.source.clone();
        let issue_number = target.issue_number;
        let patch = patch.to_string();
        let git_workspace = workspace.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            prepare_branch(&git_workspace, &source, &patch, issue_number, &settings)
        })
        .await
        .map_err(|e| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("publish task failed: {}", e),
            )
        })??;

        let draft = PullRequestDraft {
            repository: target.repository.clone(),
            head: prepared.head.clone(),
            base: prepared.base.clone(),
            title: pull_request_title(issue_number, target.issue_title),
            body: pull_request_body(issue_number),
        };
        let pr = self
            .pull_requests
            .create_pull_request(&draft, &workspace)
            .await?;

        tracing::info!(
            repository = %target.repository,
            issue = issue_number,
            head = %pr.head,
            base = %pr.base,
            url = %pr.url,
            "pull request opened"
        );
        Ok(pr)
    }
}

fn declined(err: PatchLocateError) -> PublishOutcome {
    PublishOutcome::Declined {
        category: err.category(),
        message: err.remediation().to_string(),
    }
}

/// Steps 1 to 6 of a publish: workspace, branch, apply, commit, push.
fn prepare_branch(
    workspace: &Path,
    source: &WorkspaceSource,
    patch: &str,
    issue_number: u64,
    settings: &PublisherSettings,
) -> Result<PreparedBranch, AppError> {
    let git = match source {
        WorkspaceSource::Persistent { .. } => {
            let git = GitManager::new(workspace);
            if !git.is_git_repo() {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("{} is not a git repository", workspace.display()),
                )
                .with_code("PUB-002"));
            }
            git
        }
        WorkspaceSource::Ephemeral {
            clone_url,
            push_token,
        } => {
            let url = match push_token {
                Some(token) => authenticated_url(clone_url, token)?,
                None => clone_url.clone(),
            };
            let git = GitManager::clone_into(&url, workspace)?;
            if push_token.is_some() {
                git.set_remote_url(&settings.default_remote, clone_url)?;
            }
            git
        }
    };

    let base = git.current_branch()?;
    let branches = git.branch_manager();
    let head = branches.create_patch_branch(&settings.branch_prefix, issue_number, Utc::now())?;

    let result = commit_and_push(&git, source, patch, issue_number, &head, settings);

    // Keep a persistent checkout on the branch it started from.
    if matches!(source, WorkspaceSource::Persistent { .. }) {
        match branches.checkout_branch(&base) {
            Ok(()) if result.is_err() => {
                if let Err(err) = branches.delete_branch(&head) {
                    tracing::warn!(branch = %head, error = %err, "could not delete failed patch branch");
                }
            }
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(base = %base, error = %err, "could not return checkout to its base branch")
            }
        }
    }

    result.map(|()| PreparedBranch { head, base })
}

fn commit_and_push(
    git: &GitManager,
    source: &WorkspaceSource,
    patch: &str,
    issue_number: u64,
    head: &str,
    settings: &PublisherSettings,
) -> Result<(), AppError> {
    let commits = git.commit_manager(&settings.identity);
    commits.apply_patch(patch)?;
    if !commits.commit_staged(&commit_message(issue_number))? {
        return Err(AppError::new(
            ErrorCategory::PatchApplyFailure,
            "patch applied cleanly but changed nothing",
        )
        .with_code("PUB-006"));
    }

    match source {
        WorkspaceSource::Ephemeral {
            clone_url,
            push_token: Some(token),
        } => commits.push_via(
            &settings.push_remote,
            &authenticated_url(clone_url, token)?,
            head,
        ),
        _ => commits.push(&settings.default_remote, head),
    }
}
