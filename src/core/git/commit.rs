#![allow(clippy::result_large_err)]

use super::{run_git, CommitIdentity};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Manages patch application, commit and push operations
pub struct CommitManager {
    workspace_path: PathBuf,
    identity: CommitIdentity,
}

impl CommitManager {
    pub fn new(workspace_path: &Path, identity: CommitIdentity) -> Self {
        Self {
            workspace_path: workspace_path.to_path_buf(),
            identity,
        }
    }

    /// Check if the index differs from HEAD
    pub fn has_staged_changes(&self) -> Result<bool, AppError> {
        let staged = run_git(
            &self.workspace_path,
            &["diff", "--cached", "--name-only"],
            ErrorCategory::ToolExecutionError,
            "Failed to check staged changes",
        )?;
        Ok(!staged.trim().is_empty())
    }

    /// Apply a unified diff to the working tree and the index.
    ///
    /// The diff goes through a temporary file, never the command line; the file
    /// is removed when this returns.
    pub fn apply_patch(&self, patch: &str) -> Result<(), AppError> {
        let io_err = |e: std::io::Error| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to write patch file: {}", e),
            )
            .with_code("GIT-005")
        };
        let mut file = tempfile::Builder::new()
            .prefix("patch-")
            .suffix(".diff")
            .tempfile()
            .map_err(io_err)?;
        file.write_all(patch.as_bytes()).map_err(io_err)?;
        if !patch.ends_with('\n') {
            file.write_all(b"\n").map_err(io_err)?;
        }
        file.flush().map_err(io_err)?;

        let patch_path = file.path().to_string_lossy().into_owned();
        run_git(
            &self.workspace_path,
            &["apply", "--index", "--whitespace=nowarn", &patch_path],
            ErrorCategory::PatchApplyFailure,
            "git apply rejected the patch",
        )
        .map_err(|e| e.with_code("PUB-003"))?;
        Ok(())
    }

    /// Commit what is staged under the configured identity.
    ///
    /// Untracked and unstaged files in the checkout stay out of the commit.
    /// Returns `false` when nothing was staged.
    pub fn commit_staged(&self, message: &str) -> Result<bool, AppError> {
        if !self.has_staged_changes()? {
            return Ok(false);
        }

        let name = format!("user.name={}", self.identity.name);
        let email = format!("user.email={}", self.identity.email);
        run_git(
            &self.workspace_path,
            &["-c", &name, "-c", &email, "commit", "-m", message],
            ErrorCategory::ToolExecutionError,
            "Failed to commit changes",
        )?;

        Ok(true)
    }

    /// Push `branch_name` to an existing remote (git push -u <remote> <branch>)
    pub fn push(&self, remote: &str, branch_name: &str) -> Result<(), AppError> {
        run_git(
            &self.workspace_path,
            &["push", "-u", remote, branch_name],
            ErrorCategory::PublishTransportFailure,
            &format!("Failed to push branch '{}'", branch_name),
        )
        .map_err(|e| e.with_code("PUB-004"))?;
        Ok(())
    }

    /// Push through a temporary remote named `remote_name` pointing at `url`.
    ///
    /// The remote only exists for the duration of the push, so a URL carrying a
    /// credential is not left behind in the repository config.
    pub fn push_via(&self, remote_name: &str, url: &str, branch_name: &str) -> Result<(), AppError> {
        run_git(
            &self.workspace_path,
            &["remote", "add", remote_name, url],
            ErrorCategory::PublishTransportFailure,
            &format!("Failed to add remote '{}'", remote_name),
        )
        .map_err(|e| e.with_code("PUB-004"))?;

        let pushed = self.push(remote_name, branch_name);

        if let Err(err) = run_git(
            &self.workspace_path,
            &["remote", "remove", remote_name],
            ErrorCategory::ToolExecutionError,
            "Failed to remove remote",
        ) {
            tracing::warn!(remote = remote_name, error = %err, "temporary remote left behind");
        }

        pushed
    }
}
