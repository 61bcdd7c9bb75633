//! Stable identifiers for (repository, issue) pairs.
//!
//! The task id namespaces engine output directories and container names. It is
//! deterministic, so retries of the same issue land in the same namespace and the
//! newest run directory wins, and it is injective, so two different issues never
//! share a namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic, filesystem- and container-name-safe identifier for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Derive the id for `repo_qualified_name` (e.g. `owner/repo`) and an issue number.
    ///
    /// Path separators become `__`; a literal underscore is escaped as `_0` and any
    /// character outside `[A-Za-z0-9.-]` as `_x<hex>_`, which keeps the mapping
    /// reversible. The issue number is appended after the final `-`.
    pub fn new(repo_qualified_name: &str, issue_number: u64) -> Self {
        let mut id = String::with_capacity(repo_qualified_name.len() + 8);
        for ch in repo_qualified_name.chars() {
            match ch {
                '/' | '\\' => id.push_str("__"),
                '_' => id.push_str("_0"),
                c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => id.push(c),
                c => id.push_str(&format!("_x{:x}_", c as u32)),
            }
        }
        id.push('-');
        id.push_str(&issue_number.to_string());
        TaskId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the one container allowed to exist for this task.
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn replaces_path_separators() {
        let id = TaskId::new("octo-org/hello.world", 42);
        assert_eq!(id.as_str(), "octo-org__hello.world-42");
        assert!(!id.as_str().contains('/'));
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(TaskId::new("a/b", 1), TaskId::new("a/b", 1));
    }

    #[test]
    fn is_injective_over_tricky_names() {
        let pairs = [
            ("a/b", 1),
            ("a/b", 11),
            ("a/b-1", 1),
            ("a__b", 1),
            ("a_/b", 1),
            ("a/_b", 1),
            ("a_0/b", 1),
            ("group/sub/repo", 3),
            ("group/sub__repo", 3),
            ("group__sub/repo", 3),
            ("weird name/x", 3),
            ("weird_x20_name/x", 3),
        ];
        let ids: HashSet<TaskId> = pairs.iter().map(|(r, i)| TaskId::new(r, *i)).collect();
        assert_eq!(ids.len(), pairs.len());
    }

    #[test]
    fn output_is_container_name_safe() {
        let id = TaskId::new("Some Owner/répo_x", 9);
        let name = id.container_name("patchwright");
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')));
    }
}
