#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::publisher::{PullRequestDraft, PullRequestRef, PullRequestService};
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Opens pull requests through the `gh` CLI, for single-tenant hosts where it is
/// already authenticated.
#[derive(Debug, Clone)]
pub struct PullRequestManager {
    program: PathBuf,
}

impl Default for PullRequestManager {
    fn default() -> Self {
        Self::new("gh")
    }
}

impl PullRequestManager {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check if gh CLI is available
    pub fn is_gh_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Create a pull request and return its URL.
    pub fn create_pr(&self, draft: &PullRequestDraft, workspace: &Path) -> Result<String, AppError> {
        if !self.is_gh_available() {
            return Err(AppError::new(
                ErrorCategory::PublishTransportFailure,
                "gh CLI is not installed or not available",
            )
            .with_code("PUB-005"));
        }

        let repo = draft.repository.full_name();
        let output = Command::new(&self.program)
            .args([
                "pr",
                "create",
                "--repo",
                repo.as_str(),
                "--head",
                draft.head.as_str(),
                "--base",
                draft.base.as_str(),
                "--title",
                draft.title.as_str(),
                "--body",
                draft.body.as_str(),
            ])
            .current_dir(workspace)
            .output()
            .map_err(|e| {
                AppError::new(
                    ErrorCategory::PublishTransportFailure,
                    format!("Failed to execute gh command: {}", e),
                )
                .with_code("PUB-005")
            })?;

        if !output.status.success() {
            return Err(AppError::new(
                ErrorCategory::PublishTransportFailure,
                format!(
                    "Failed to create PR: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )
            .with_code("PUB-005"));
        }

        // gh prints the PR URL as its last line
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().last().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl PullRequestService for PullRequestManager {
    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
        workspace: &Path,
    ) -> Result<PullRequestRef, AppError> {
        let manager = self.clone();
        let draft_owned = draft.clone();
        let workspace = workspace.to_path_buf();
        let url = tokio::task::spawn_blocking(move || manager.create_pr(&draft_owned, &workspace))
            .await
            .map_err(|e| {
                AppError::new(
                    ErrorCategory::InternalError,
                    format!("gh task failed: {}", e),
                )
            })??;

        Ok(PullRequestRef {
            number: pr_number_from_url(&url),
            url,
            head: draft.head.clone(),
            base: draft.base.clone(),
        })
    }
}

fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
