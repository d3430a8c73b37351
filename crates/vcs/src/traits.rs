use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Checked-out working tree owned by one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub path: PathBuf,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, path: PathBuf, branch_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path,
            branch_name: branch_name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_branch(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = branch_name.into();
        self
    }
}

/// Trait for version control system operations
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Get the name of the VCS backend
    fn name(&self) -> &'static str;

    /// Check if the VCS is available (command exists)
    async fn is_available(&self) -> bool;

    /// Check if `path` is a working tree of this VCS
    async fn is_initialized(&self, path: &Path) -> Result<bool>;

    /// Clone `url` at `branch` into `target`
    async fn clone_repo(&self, url: &str, branch: &str, target: &Path) -> Result<Workspace>;

    /// Bring an existing checkout up to date with `branch` on `url`
    async fn pull(&self, workspace: &Workspace, url: &str) -> Result<()>;

    /// Create and switch to a new branch
    async fn create_branch(&self, workspace: &Workspace, branch: &str) -> Result<()>;

    /// Name of the branch currently checked out
    async fn current_branch(&self, workspace: &Workspace) -> Result<String>;

    /// Check if there are uncommitted changes in a workspace
    async fn has_uncommitted_changes(&self, workspace: &Workspace) -> Result<bool>;

    /// Short status of the working tree
    async fn get_status(&self, workspace: &Workspace) -> Result<String>;

    /// Get diff of staged and unstaged changes
    async fn get_diff(&self, workspace: &Workspace) -> Result<String>;

    /// Stage everything and commit, returning the new commit id
    async fn commit(&self, workspace: &Workspace, message: &str) -> Result<String>;

    /// Push `branch` to `remote`
    async fn push(&self, workspace: &Workspace, remote: &str, branch: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_new() {
        let ws = Workspace::new("job-123", PathBuf::from("/tmp/ws"), "main");

        assert_eq!(ws.id, "job-123");
        assert_eq!(ws.path, PathBuf::from("/tmp/ws"));
        assert_eq!(ws.branch_name, "main");
    }

    #[test]
    fn test_workspace_with_branch() {
        let ws = Workspace::new("job-1", PathBuf::from("/tmp/ws"), "main").with_branch("feature/x");
        assert_eq!(ws.branch_name, "feature/x");
    }
}
