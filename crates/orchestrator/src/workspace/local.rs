use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use events::{EventEmitter, ProgressEvent, RepoPullStatus};
use jobrelay_core::Job;
use tracing::info;
use vcs::{authenticated_url, redact, VersionControl, Workspace};

use super::{require_repository, WorkspacePreparer};
use crate::error::{OrchestratorError, Result};

/// Clones or updates the repository in-process with the local VCS.
pub struct LocalGitPreparer {
    vcs: Arc<dyn VersionControl>,
}

impl LocalGitPreparer {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }
}

fn workspace_error(e: vcs::VcsError) -> OrchestratorError {
    OrchestratorError::Workspace(redact(&e.to_string()))
}

#[async_trait]
impl WorkspacePreparer for LocalGitPreparer {
    async fn prepare(&self, job: &Job, target: &Path, emitter: &EventEmitter) -> Result<PathBuf> {
        let repository = require_repository(job)?;
        let url = authenticated_url(&repository.url, repository.access_token.as_deref());

        if self.vcs.is_initialized(target).await.map_err(workspace_error)? {
            emitter
                .emit(ProgressEvent::repo_pull(
                    RepoPullStatus::Pulling,
                    format!("Pulling latest changes from {}", repository.branch),
                ))
                .await?;
            let workspace = Workspace::new(job.id.to_string(), target.to_path_buf(), &repository.branch);
            self.vcs
                .pull(&workspace, &url)
                .await
                .map_err(workspace_error)?;
        } else {
            emitter
                .emit(ProgressEvent::repo_pull(
                    RepoPullStatus::Cloning,
                    format!("Cloning {} ({})", redact(&repository.url), repository.branch),
                ))
                .await?;
            self.vcs
                .clone_repo(&url, &repository.branch, target)
                .await
                .map_err(workspace_error)?;
        }

        emitter
            .emit(ProgressEvent::repo_pull(
                RepoPullStatus::Complete,
                "Repository ready",
            ))
            .await?;
        info!(job_id = %job.id, path = %target.display(), "Repository prepared");
        Ok(target.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{JobRequest, Provider, RepositoryBinding};
    use std::process::Command;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use vcs::GitVcs;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("failed to run git");
        assert!(output.status.success(), "git {:?} failed", args);
    }

    fn seed_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare", "-b", "main"]);

        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "-b", "main"]);
        git(&seed, &["config", "user.email", "seed@example.com"]);
        git(&seed, &["config", "user.name", "Seed"]);
        std::fs::write(seed.join("README.md"), "# App\n").unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "-m", "Initial commit"]);
        git(&seed, &["push", remote.to_str().unwrap(), "main"]);
        remote
    }

    fn job_for(remote: &Path) -> Job {
        Job::from_request(
            JobRequest::new("Add docs", Provider::Claude)
                .with_repository(RepositoryBinding::new(remote.to_str().unwrap())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_clone_then_pull() {
        let root = TempDir::new().unwrap();
        let remote = seed_remote(root.path());
        let job = job_for(&remote);
        let target = root.path().join("workspaces").join(job.id.to_string());
        let preparer = LocalGitPreparer::new(Arc::new(GitVcs::new()));

        let (tx, mut rx) = mpsc::channel(16);
        let emitter = EventEmitter::new(job.id).with_caller(tx);
        let path = preparer.prepare(&job, &target, &emitter).await.unwrap();
        assert!(path.join("README.md").exists());
        assert_eq!(
            rx.recv().await.unwrap().repo_pull_status(),
            Some(RepoPullStatus::Cloning)
        );
        assert_eq!(
            rx.recv().await.unwrap().repo_pull_status(),
            Some(RepoPullStatus::Complete)
        );

        let (tx, mut rx) = mpsc::channel(16);
        let emitter = EventEmitter::new(job.id).with_caller(tx);
        preparer.prepare(&job, &target, &emitter).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap().repo_pull_status(),
            Some(RepoPullStatus::Pulling)
        );
    }

    #[tokio::test]
    async fn test_clone_failure_is_workspace_error() {
        let root = TempDir::new().unwrap();
        let job = job_for(&root.path().join("missing.git"));
        let preparer = LocalGitPreparer::new(Arc::new(GitVcs::new()));
        let emitter = EventEmitter::new(job.id);

        let err = preparer
            .prepare(&job, &root.path().join("ws"), &emitter)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Workspace(_)));
    }
}
