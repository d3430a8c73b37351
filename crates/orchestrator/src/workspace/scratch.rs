use std::path::{Path, PathBuf};

use async_trait::async_trait;
use events::EventEmitter;
use jobrelay_core::Job;
use tracing::debug;

use super::WorkspacePreparer;
use crate::error::{OrchestratorError, Result};

/// Empty directory for jobs that are not bound to a repository.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScratchPreparer;

#[async_trait]
impl WorkspacePreparer for ScratchPreparer {
    async fn prepare(&self, job: &Job, target: &Path, _emitter: &EventEmitter) -> Result<PathBuf> {
        debug!(job_id = %job.id, target = %target.display(), "Creating scratch workspace");
        tokio::fs::create_dir_all(target).await.map_err(|e| {
            OrchestratorError::Workspace(format!("cannot create {}: {}", target.display(), e))
        })?;
        Ok(target.to_path_buf())
    }
}
