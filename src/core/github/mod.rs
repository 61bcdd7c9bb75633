#![allow(clippy::result_large_err)]

//! Minimal GitHub REST client for the hosting-platform side of the pipeline.
//!
//! Every call is a single attempt: a failed request is reported, never retried.

use crate::core::conversation::{AuthorKind, Comment, CommentSource};
use crate::core::credentials::VariableStore;
use crate::core::error::AppError;
use crate::core::publisher::{PullRequestDraft, PullRequestRef, PullRequestService};
use crate::core::request::RepositoryRef;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
struct GithubUser {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubIssueComment {
    #[serde(default)]
    body: Option<String>,
    user: Option<GithubUser>,
}

impl From<GithubIssueComment> for Comment {
    fn from(raw: GithubIssueComment) -> Self {
        let is_bot = raw
            .user
            .map(|user| user.kind.eq_ignore_ascii_case("bot"))
            .unwrap_or(false);
        Comment {
            author_kind: if is_bot {
                AuthorKind::Bot
            } else {
                AuthorKind::User
            },
            body: raw.body.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GithubVariable {
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubCommentCreateResponse {
    pub id: u64,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubPullRequestResponse {
    number: u64,
    html_url: String,
}

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(api_base: &str, token: Option<&str>, request_timeout_ms: u64) -> Result<Self, AppError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("patchwright"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| {
                    AppError::new(
                        ErrorCategory::ValidationError,
                        "invalid github authorization header",
                    )
                    .with_code("GH-001")
                })?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .map_err(|e| {
                AppError::new(
                    ErrorCategory::InternalError,
                    format!("failed to create github api client: {}", e),
                )
                .with_code("GH-001")
            })?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, repository: &RepositoryRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, repository.owner, repository.name, path
        )
    }

    /// Read a repository Actions variable; `None` when it is not defined.
    pub async fn get_repository_variable(
        &self,
        repository: &RepositoryRef,
        name: &str,
    ) -> Result<Option<String>, AppError> {
        let url = self.repo_url(repository, &format!("actions/variables/{}", name));
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error("read repository variable", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let variable: GithubVariable = decode("read repository variable", response).await?;
        Ok(Some(variable.value))
    }

    /// All comments of an issue, oldest first.
    pub async fn list_issue_comments(
        &self,
        repository: &RepositoryRef,
        issue_number: u64,
    ) -> Result<Vec<Comment>, AppError> {
        let url = self.repo_url(repository, &format!("issues/{}/comments", issue_number));
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("sort", "created"),
                    ("direction", "asc"),
                    ("per_page", per_page.as_str()),
                    ("page", page_value.as_str()),
                ])
                .send()
                .await
                .map_err(|e| transport_error("list issue comments", e))?;
            let chunk: Vec<GithubIssueComment> = decode("list issue comments", response).await?;
            let chunk_len = chunk.len();
            rows.extend(chunk.into_iter().map(Comment::from));
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    pub async fn create_issue_comment(
        &self,
        repository: &RepositoryRef,
        issue_number: u64,
        body: &str,
    ) -> Result<GithubCommentCreateResponse, AppError> {
        let response = self
            .http
            .post(self.repo_url(repository, &format!("issues/{}/comments", issue_number)))
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| transport_error("create issue comment", e))?;
        decode("create issue comment", response).await
    }

    pub async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, AppError> {
        let payload = json!({
            "title": draft.title,
            "body": draft.body,
            "head": draft.head,
            "base": draft.base,
        });
        let response = self
            .http
            .post(self.repo_url(&draft.repository, "pulls"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("create pull request", e))?;
        let created: GithubPullRequestResponse = decode("create pull request", response)
            .await
            .map_err(|mut e| {
                e.category = ErrorCategory::PublishTransportFailure;
                e
            })?;
        Ok(PullRequestRef {
            number: Some(created.number),
            url: created.html_url,
            head: draft.head.clone(),
            base: draft.base.clone(),
        })
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> AppError {
    AppError::new(
        ErrorCategory::PublishTransportFailure,
        format!("github api {} failed: {}", operation, err),
    )
    .with_code("GH-002")
}

async fn decode<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(operation, e))?;
    if !status.is_success() {
        return Err(AppError::new(
            ErrorCategory::ToolExecutionError,
            format!(
                "github api {} failed with status {}: {}",
                operation,
                status.as_u16(),
                truncate_for_error(&body, 400)
            ),
        )
        .with_code("GH-003"));
    }
    serde_json::from_str(&body).map_err(|e| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to decode github api {} response: {}", operation, e),
        )
        .with_code("GH-004")
    })
}

fn truncate_for_error(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl VariableStore for GithubClient {
    async fn read_variable(
        &self,
        repository: &RepositoryRef,
        name: &str,
    ) -> Result<Option<String>, AppError> {
        self.get_repository_variable(repository, name).await
    }
}

#[async_trait]
impl CommentSource for GithubClient {
    async fn list_comments(
        &self,
        repository: &RepositoryRef,
        issue_number: u64,
    ) -> Result<Vec<Comment>, AppError> {
        self.list_issue_comments(repository, issue_number).await
    }
}

#[async_trait]
impl PullRequestService for GithubClient {
    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
        _workspace: &Path,
    ) -> Result<PullRequestRef, AppError> {
        GithubClient::create_pull_request(self, draft).await
    }
}
