//! Workspace preparation: produces the directory a job runs in.

mod local;
mod remote;
mod scratch;

pub use local::LocalGitPreparer;
pub use remote::RemotePullPreparer;
pub use scratch::ScratchPreparer;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use events::EventEmitter;
use jobrelay_core::{Job, RepositoryBinding};

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait WorkspacePreparer: Send + Sync {
    /// Makes `target` ready for `job` and returns the directory to run in.
    ///
    /// Progress is reported through `emitter` as `repo_pull` events.
    async fn prepare(&self, job: &Job, target: &Path, emitter: &EventEmitter) -> Result<PathBuf>;
}

pub(crate) fn require_repository(job: &Job) -> Result<&RepositoryBinding> {
    job.repository
        .as_ref()
        .ok_or_else(|| OrchestratorError::Workspace("job has no repository binding".to_string()))
}
