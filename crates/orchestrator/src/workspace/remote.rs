use std::path::{Path, PathBuf};

use async_trait::async_trait;
use events::{EventEmitter, ProgressEvent, RepoPullStatus};
use jobrelay_core::Job;
use relay::{PullRequest, PullUpdate, RepoPullClient};
use tracing::{debug, info};

use super::{require_repository, WorkspacePreparer};
use crate::error::{OrchestratorError, Result};

/// Delegates clone/pull to the downstream repository-pull service.
pub struct RemotePullPreparer {
    client: RepoPullClient,
}

impl RemotePullPreparer {
    pub fn new(client: RepoPullClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkspacePreparer for RemotePullPreparer {
    async fn prepare(&self, job: &Job, target: &Path, emitter: &EventEmitter) -> Result<PathBuf> {
        let repository = require_repository(job)?;
        let request = PullRequest {
            repo_url: repository.url.clone(),
            branch: repository.branch.clone(),
            target_directory: target.display().to_string(),
            token: repository.access_token.clone(),
        };

        let mut session = self
            .client
            .pull(&request)
            .await
            .map_err(|e| OrchestratorError::Workspace(e.to_string()))?;

        while let Some(update) = session.next_update().await {
            match update.map_err(|e| OrchestratorError::Workspace(e.to_string()))? {
                PullUpdate::Progress { status, message } => {
                    let status = RepoPullStatus::parse(&status).unwrap_or(RepoPullStatus::Cloning);
                    emitter
                        .emit(ProgressEvent::repo_pull(status, message))
                        .await?;
                }
                PullUpdate::Complete { message, .. } => {
                    let message = if message.is_empty() {
                        "Repository ready".to_string()
                    } else {
                        message
                    };
                    emitter
                        .emit(ProgressEvent::repo_pull(RepoPullStatus::Complete, message))
                        .await?;
                }
                PullUpdate::Unknown => debug!(job_id = %job.id, "Ignoring unknown pull record"),
            }
        }

        let path = session
            .target_path()
            .map_err(|e| OrchestratorError::Workspace(e.to_string()))?;
        info!(job_id = %job.id, path = %path.display(), "Repository pulled");
        Ok(path)
    }
}
