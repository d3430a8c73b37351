//! Auto-commit sub-pipeline.
//!
//! `analyzing -> generating_message -> committing -> committed -> pushing ->
//! pushed | push_failed -> completed`. Nothing in here fails the job: a
//! commit failure ends the sub-pipeline early and a push failure is reported
//! as `push_failed`.

use std::sync::Arc;
use std::time::Duration;

use events::{EventEmitter, ProgressEvent, Stage};
use tracing::{info, warn};
use vcs::{redact, VersionControl, Workspace};

use crate::commit_message::{
    truncate_diff, CommitMessageGenerator, DEFAULT_MAX_DIFF_BYTES, FALLBACK_COMMIT_MESSAGE,
};
use crate::error::{OrchestratorError, Result};
use crate::stage::{StageScope, StageTracker};

#[derive(Debug, Clone)]
pub struct AutoCommitConfig {
    pub push: bool,
    pub remote: String,
    pub max_diff_bytes: usize,
    /// Upper bound on commit message generation, whatever the generator does.
    pub message_timeout: Duration,
}

impl Default for AutoCommitConfig {
    fn default() -> Self {
        Self {
            push: true,
            remote: "origin".to_string(),
            max_diff_bytes: DEFAULT_MAX_DIFF_BYTES,
            message_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoCommitOutcome {
    /// Working tree was clean.
    NoChanges,
    /// Nothing was committed; the changes stay in the workspace.
    CommitFailed { error: String },
    Committed {
        hash: String,
        message: String,
        branch: String,
        pushed: bool,
        push_error: Option<String>,
    },
}

pub struct AutoCommit {
    vcs: Arc<dyn VersionControl>,
    generator: Option<Arc<dyn CommitMessageGenerator>>,
    config: AutoCommitConfig,
}

struct StageEmitter<'a> {
    emitter: &'a EventEmitter,
    tracker: &'a mut StageTracker,
}

impl StageEmitter<'_> {
    async fn emit(&mut self, event: ProgressEvent) -> Result<()> {
        if let Some(stage) = event.stage {
            self.tracker.enter(StageScope::AutoCommit, stage)?;
        }
        self.emitter.emit(event).await?;
        Ok(())
    }
}

impl AutoCommit {
    pub fn new(vcs: Arc<dyn VersionControl>, config: AutoCommitConfig) -> Self {
        Self {
            vcs,
            generator: None,
            config,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn CommitMessageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &AutoCommitConfig {
        &self.config
    }

    /// Runs the sub-pipeline to its own `completed`.
    ///
    /// Errors are reserved for emission and ordering failures.
    pub async fn run(
        &self,
        workspace: &Workspace,
        emitter: &EventEmitter,
        tracker: &mut StageTracker,
    ) -> Result<AutoCommitOutcome> {
        let mut out = StageEmitter { emitter, tracker };

        out.emit(ProgressEvent::commit(Stage::Analyzing, "Analyzing changes"))
            .await?;

        match self.vcs.has_uncommitted_changes(workspace).await {
            Ok(true) => {}
            Ok(false) => {
                info!(workspace = %workspace.path.display(), "No changes to commit");
                out.emit(ProgressEvent::commit(Stage::Completed, "No changes to commit"))
                    .await?;
                return Ok(AutoCommitOutcome::NoChanges);
            }
            Err(e) => {
                let error = redact(&e.to_string());
                warn!(error = %error, "Could not inspect workspace");
                out.emit(
                    ProgressEvent::commit(Stage::Completed, "Auto-commit skipped")
                        .with_error(error.clone()),
                )
                .await?;
                return Ok(AutoCommitOutcome::CommitFailed { error });
            }
        }

        out.emit(ProgressEvent::commit(
            Stage::GeneratingMessage,
            "Generating commit message",
        ))
        .await?;
        let message = self.draft_message(workspace).await;

        out.emit(
            ProgressEvent::commit(Stage::Committing, "Committing changes")
                .with_commit_message(message.clone()),
        )
        .await?;

        let hash = match self.vcs.commit(workspace, &message).await {
            Ok(hash) => hash,
            Err(e) => {
                let error = redact(&e.to_string());
                warn!(error = %error, "Auto-commit failed");
                out.emit(
                    ProgressEvent::commit(Stage::Completed, "Commit failed")
                        .with_commit_message(message)
                        .with_error(error.clone()),
                )
                .await?;
                return Ok(AutoCommitOutcome::CommitFailed { error });
            }
        };

        let branch = match self.vcs.current_branch(workspace).await {
            Ok(branch) => branch,
            Err(e) => {
                warn!(error = %e, "Could not read current branch");
                workspace.branch_name.clone()
            }
        };

        info!(hash = %hash, branch = %branch, "Changes committed");
        out.emit(
            ProgressEvent::commit(Stage::Committed, "Changes committed")
                .with_commit_hash(hash.clone())
                .with_commit_message(message.clone())
                .with_branch(branch.clone()),
        )
        .await?;

        let (pushed, push_error) = if self.config.push {
            self.push(&mut out, workspace, &hash, &branch).await?
        } else {
            (false, None)
        };

        out.emit(
            ProgressEvent::commit(Stage::Completed, "Auto-commit completed")
                .with_commit_hash(hash.clone())
                .with_branch(branch.clone()),
        )
        .await?;

        Ok(AutoCommitOutcome::Committed {
            hash,
            message,
            branch,
            pushed,
            push_error,
        })
    }

    async fn push(
        &self,
        out: &mut StageEmitter<'_>,
        workspace: &Workspace,
        hash: &str,
        branch: &str,
    ) -> Result<(bool, Option<String>)> {
        let remote = &self.config.remote;
        out.emit(
            ProgressEvent::commit(Stage::Pushing, format!("Pushing to {}/{}", remote, branch))
                .with_commit_hash(hash)
                .with_branch(branch),
        )
        .await?;

        match self.vcs.push(workspace, remote, branch).await {
            Ok(()) => {
                out.emit(
                    ProgressEvent::commit(Stage::Pushed, format!("Pushed to {}/{}", remote, branch))
                        .with_commit_hash(hash)
                        .with_branch(branch),
                )
                .await?;
                Ok((true, None))
            }
            Err(e) => {
                let error = redact(&e.to_string());
                warn!(error = %error, "Push failed; commit kept locally");
                out.emit(
                    ProgressEvent::commit(Stage::PushFailed, "Push failed (non-critical)")
                        .with_commit_hash(hash)
                        .with_branch(branch)
                        .with_error(error.clone()),
                )
                .await?;
                Ok((false, Some(error)))
            }
        }
    }

    /// Generated message, or the fallback on any failure or timeout.
    async fn draft_message(&self, workspace: &Workspace) -> String {
        let Some(generator) = &self.generator else {
            return FALLBACK_COMMIT_MESSAGE.to_string();
        };

        let status = self.vcs.get_status(workspace).await.unwrap_or_default();
        let diff = self.vcs.get_diff(workspace).await.unwrap_or_default();
        let diff = truncate_diff(&diff, self.config.max_diff_bytes);

        let drafted =
            tokio::time::timeout(self.config.message_timeout, generator.generate(&status, &diff))
                .await
                .unwrap_or_else(|_| {
                    Err(OrchestratorError::CommitMessage(format!(
                        "timed out after {}ms",
                        self.config.message_timeout.as_millis()
                    )))
                });

        match drafted {
            Ok(message) if !message.trim().is_empty() => message,
            Ok(_) => {
                warn!("Commit message generator returned nothing; using fallback");
                FALLBACK_COMMIT_MESSAGE.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Commit message generation failed; using fallback");
                FALLBACK_COMMIT_MESSAGE.to_string()
            }
        }
    }
}
