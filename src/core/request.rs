use crate::core::task_identity::TaskId;
use crate::core::types::ErrorCategory;
use crate::core::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `owner/name` reference to a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryRef {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_matches('/');
        match trimmed.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(RepositoryRef::new(owner, name))
            }
            _ => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("repository must be written as owner/name, got '{}'", value),
            )
            .with_code("REQ-001")),
        }
    }
}

/// Immutable description of one triggering event.
///
/// Built once per issue or comment event and dropped when the pipeline returns.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRequest {
    pub issue_number: u64,
    pub issue_url: String,
    pub issue_title: String,
    pub issue_body: String,
    pub repository: RepositoryRef,
    pub clone_url: String,
    /// Model requested by the user; `None` means nothing was configured.
    pub model: Option<String>,
}

impl InvocationRequest {
    pub fn task_id(&self) -> TaskId {
        TaskId::new(&self.repository.full_name(), self.issue_number)
    }

    /// Issue title and body as handed to the engine.
    pub fn issue_text(&self) -> String {
        if self.issue_title.is_empty() {
            self.issue_body.clone()
        } else {
            format!("{}\n{}", self.issue_title, self.issue_body)
        }
    }
}
