#![allow(clippy::result_large_err)]

use super::run_git;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Manages git branch operations
pub struct BranchManager {
    workspace_path: PathBuf,
}

impl BranchManager {
    pub fn new(workspace_path: &Path) -> Self {
        Self {
            workspace_path: workspace_path.to_path_buf(),
        }
    }

    /// Create a new branch and check it out
    pub fn create_branch(&self, name: &str) -> Result<(), AppError> {
        run_git(
            &self.workspace_path,
            &["checkout", "-b", name],
            ErrorCategory::ToolExecutionError,
            &format!("Failed to create branch '{}'", name),
        )
        .map(|_| ())
    }

    /// Check out an existing branch
    pub fn checkout_branch(&self, name: &str) -> Result<(), AppError> {
        run_git(
            &self.workspace_path,
            &["checkout", name],
            ErrorCategory::ToolExecutionError,
            &format!("Failed to checkout branch '{}'", name),
        )
        .map(|_| ())
    }

    /// Force-delete a local branch that is not checked out
    pub fn delete_branch(&self, name: &str) -> Result<(), AppError> {
        run_git(
            &self.workspace_path,
            &["branch", "-D", name],
            ErrorCategory::ToolExecutionError,
            &format!("Failed to delete branch '{}'", name),
        )
        .map(|_| ())
    }

    /// Check if a branch exists
    pub fn branch_exists(&self, name: &str) -> Result<bool, AppError> {
        let refname = format!("refs/heads/{}", name);
        match run_git(
            &self.workspace_path,
            &["show-ref", "--verify", "--quiet", &refname],
            ErrorCategory::ToolExecutionError,
            "show-ref",
        ) {
            Ok(_) => Ok(true),
            Err(err) if err.code == "GIT-004" => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create and check out the branch for a patch of `issue_number`.
    ///
    /// The name carries a readable timestamp; should that name already exist
    /// (two publishes within the same second) a counter is appended.
    pub fn create_patch_branch(
        &self,
        prefix: &str,
        issue_number: u64,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let base = patch_branch_name(prefix, issue_number, now);
        let mut candidate = base.clone();
        let mut attempt = 1;
        while self.branch_exists(&candidate)? {
            attempt += 1;
            candidate = format!("{}-{}", base, attempt);
        }
        self.create_branch(&candidate)?;
        Ok(candidate)
    }
}

/// `{prefix}-{issue}-{YYYYMMDD-HHMMSS}`
pub fn patch_branch_name(prefix: &str, issue_number: u64, now: DateTime<Utc>) -> String {
    format!("{}-{}-{}", prefix, issue_number, now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::git::test_support::{git, init_git_repo};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_create_branch() {
        let temp_dir = TempDir::new().unwrap();
        init_git_repo(temp_dir.path());

        let manager = BranchManager::new(temp_dir.path());
        manager.create_branch("test-branch").unwrap();
        assert!(manager.branch_exists("test-branch").unwrap());
    }

    #[test]
    fn test_checkout_branch() {
        let temp_dir = TempDir::new().unwrap();
        init_git_repo(temp_dir.path());
        let main_branch = git(temp_dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"]);

        let manager = BranchManager::new(temp_dir.path());
        manager.create_branch("test-branch").unwrap();
        manager.checkout_branch(&main_branch).unwrap();

        assert_eq!(
            git(temp_dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"]),
            main_branch
        );
    }

    #[test]
    fn test_delete_branch() {
        let temp_dir = TempDir::new().unwrap();
        init_git_repo(temp_dir.path());
        let main_branch = git(temp_dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"]);

        let manager = BranchManager::new(temp_dir.path());
        manager.create_branch("doomed").unwrap();
        manager.checkout_branch(&main_branch).unwrap();
        manager.delete_branch("doomed").unwrap();
        assert!(!manager.branch_exists("doomed").unwrap());
    }

    #[test]
    fn test_branch_exists() {
        let temp_dir = TempDir::new().unwrap();
        init_git_repo(temp_dir.path());

        let manager = BranchManager::new(temp_dir.path());
        assert!(!manager.branch_exists("non-existent").unwrap());
    }

    #[test]
    fn test_patch_branch_name_is_readable() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 14, 5, 9).unwrap();
        assert_eq!(
            patch_branch_name("patchwright/issue", 17, now),
            "patchwright/issue-17-20240603-140509"
        );
    }

    #[test]
    fn test_create_patch_branch_avoids_collisions() {
        let temp_dir = TempDir::new().unwrap();
        init_git_repo(temp_dir.path());
        let manager = BranchManager::new(temp_dir.path());
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 14, 5, 9).unwrap();

        let first = manager.create_patch_branch("fix", 3, now).unwrap();
        let second = manager.create_patch_branch("fix", 3, now).unwrap();
        assert_eq!(first, "fix-3-20240603-140509");
        assert_eq!(second, "fix-3-20240603-140509-2");
    }
}
