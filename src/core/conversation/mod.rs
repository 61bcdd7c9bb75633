//! Finding the latest generated patch in an issue conversation.
//!
//! The locator is recomputed on every publish request: nothing is cached, so an
//! edited or newer bot comment is always what gets published.

use crate::core::error::AppError;
use crate::core::results_processor::SUCCESS_MARKER;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DIFF_FENCE_OPEN: &str = "```diff";
const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorKind {
    Bot,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author_kind: AuthorKind,
    pub body: String,
}

impl Comment {
    pub fn bot(body: impl Into<String>) -> Self {
        Self {
            author_kind: AuthorKind::Bot,
            body: body.into(),
        }
    }

    pub fn user(body: impl Into<String>) -> Self {
        Self {
            author_kind: AuthorKind::User,
            body: body.into(),
        }
    }

    fn is_patch_comment(&self) -> bool {
        self.author_kind == AuthorKind::Bot && self.body.starts_with(SUCCESS_MARKER)
    }
}

/// Source of an issue's comments, oldest first.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn list_comments(
        &self,
        repository: &crate::core::request::RepositoryRef,
        issue_number: u64,
    ) -> Result<Vec<Comment>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchLocateError {
    #[error("no generated patch found in the conversation")]
    NoPatchAvailable,
    #[error("the latest generated patch has no complete diff block")]
    MalformedPatch,
}

impl PatchLocateError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PatchLocateError::NoPatchAvailable => ErrorCategory::NoPatchAvailable,
            PatchLocateError::MalformedPatch => ErrorCategory::MalformedPatch,
        }
    }

    /// Reply posted to the issue instead of attempting any git operation.
    pub fn remediation(&self) -> &'static str {
        match self {
            PatchLocateError::NoPatchAvailable => {
                "There is no patch to open a pull request from. Please ask for a patch first, then try again."
            }
            PatchLocateError::MalformedPatch => {
                "The latest patch could not be read: its diff block is incomplete. Please ask for a new patch, then try again."
            }
        }
    }
}

impl From<PatchLocateError> for AppError {
    fn from(err: PatchLocateError) -> Self {
        let code = match err {
            PatchLocateError::NoPatchAvailable => "LOCATE-001",
            PatchLocateError::MalformedPatch => "LOCATE-002",
        };
        AppError::new(err.category(), err.to_string())
            .with_code(code)
            .with_suggestion(err.remediation())
    }
}

/// Body of the last bot comment that starts with the success marker.
pub fn latest_patch_comment(comments: &[Comment]) -> Result<&str, PatchLocateError> {
    comments
        .iter()
        .rev()
        .find(|c| c.is_patch_comment())
        .map(|c| c.body.as_str())
        .ok_or(PatchLocateError::NoPatchAvailable)
}

/// Diff text between the first `diff` fence opener and the next closing fence.
///
/// Leading whitespace is dropped. Everything else is kept verbatim apart from the
/// line break that puts the closing fence on its own line.
pub fn extract_diff(body: &str) -> Result<&str, PatchLocateError> {
    let start = body
        .find(DIFF_FENCE_OPEN)
        .ok_or(PatchLocateError::MalformedPatch)?
        + DIFF_FENCE_OPEN.len();
    let rest = &body[start..];
    let end = rest.find(FENCE).ok_or(PatchLocateError::MalformedPatch)?;
    let region = rest[..end].trim_start();
    Ok(region.strip_suffix('\n').unwrap_or(region))
}

/// Locate and unwrap the patch to publish.
pub fn locate_latest_patch(comments: &[Comment]) -> Result<String, PatchLocateError> {
    let body = latest_patch_comment(comments)?;
    let diff = extract_diff(body)?;
    if diff.trim().is_empty() {
        return Err(PatchLocateError::MalformedPatch);
    }
    Ok(diff.to_string())
}
