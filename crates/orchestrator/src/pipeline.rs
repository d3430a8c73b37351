//! Stage pipeline: `preparing_workspace -> executing_provider ->
//! [auto-commit] -> completed`.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use events::{ErrorCode, EventEmitter, ProgressEvent, Stage};
use futures::StreamExt;
use jobrelay_core::Job;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use vcs::{redact, VersionControl, Workspace};

use crate::auto_commit::{AutoCommit, AutoCommitConfig, AutoCommitOutcome};
use crate::error::{OrchestratorError, Result};
use crate::provider::{ExecutionRequest, ProviderMessage, ProviderRegistry};
use crate::stage::{StageScope, StageTracker};
use crate::workspace::{LocalGitPreparer, ScratchPreparer, WorkspacePreparer};

/// Final result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutcome {
    pub job_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub code: Option<ErrorCode>,
    pub duration_ms: u64,
    pub workspace: Option<PathBuf>,
    pub provider_session_id: Option<String>,
    pub auto_commit: Option<AutoCommitOutcome>,
}

/// Values produced by one stage for the ones after it.
#[derive(Default)]
struct Carried {
    workspace: Option<PathBuf>,
    provider_session_id: Option<String>,
    auto_commit: Option<AutoCommitOutcome>,
}

pub struct Pipeline {
    workspace_root: PathBuf,
    vcs: Arc<dyn VersionControl>,
    repo_preparer: Arc<dyn WorkspacePreparer>,
    scratch: ScratchPreparer,
    providers: ProviderRegistry,
    auto_commit: AutoCommit,
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        result = fut => result,
    }
}

impl Pipeline {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        vcs: Arc<dyn VersionControl>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            repo_preparer: Arc::new(LocalGitPreparer::new(vcs.clone())),
            scratch: ScratchPreparer,
            auto_commit: AutoCommit::new(vcs.clone(), AutoCommitConfig::default()),
            vcs,
            providers,
        }
    }

    /// Replaces the preparer used for repository-bound jobs.
    pub fn with_preparer(mut self, preparer: Arc<dyn WorkspacePreparer>) -> Self {
        self.repo_preparer = preparer;
        self
    }

    pub fn with_auto_commit(mut self, auto_commit: AutoCommit) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    /// Drives `job` to its terminal `completed` event.
    ///
    /// `provider_session` is the provider-native session to resume. Never
    /// fails: errors end up in the outcome and in the event stream.
    pub async fn run(
        &self,
        job: &Job,
        provider_session: Option<String>,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> TerminalOutcome {
        let started = Instant::now();
        let mut tracker = StageTracker::new();
        let mut carried = Carried::default();

        info!(job_id = %job.id, provider = %job.provider, "Job started");
        let result = self
            .run_stages(job, provider_session, emitter, cancel, &mut tracker, &mut carried)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let session_id = job.id.to_string();

        let (error, code) = match result {
            Ok(()) => {
                info!(job_id = %job.id, duration_ms, "Job completed");
                (None, None)
            }
            Err(e) => {
                let message = redact(&e.to_string());
                let code = e.code();
                error!(
                    job_id = %job.id,
                    stage = ?tracker.current(),
                    code = %code,
                    error = %message,
                    "Job failed"
                );
                Self::emit_final(
                    emitter,
                    ProgressEvent::error(code, tracker.current(), message.clone()),
                )
                .await;
                (Some(message), Some(code))
            }
        };

        if let Err(e) = tracker.enter(StageScope::Job, Stage::Completed) {
            warn!(job_id = %job.id, error = %e, "Completed reached out of order");
        }
        let mut completed = ProgressEvent::job_completed(session_id, duration_ms);
        if let Some(message) = &error {
            completed = completed.with_error(message.clone());
        }
        Self::emit_final(emitter, completed).await;

        TerminalOutcome {
            job_id: job.id,
            success: error.is_none(),
            error,
            code,
            duration_ms,
            workspace: carried.workspace,
            provider_session_id: carried.provider_session_id,
            auto_commit: carried.auto_commit,
        }
    }

    async fn emit_final(emitter: &EventEmitter, event: ProgressEvent) {
        if let Err(e) = emitter.emit(event).await {
            warn!(job_id = %emitter.job_id(), error = %e, "Could not emit terminal event");
        }
    }

    async fn enter(
        tracker: &mut StageTracker,
        emitter: &EventEmitter,
        stage: Stage,
        message: impl Into<String>,
    ) -> Result<()> {
        tracker.enter(StageScope::Job, stage)?;
        emitter.emit(ProgressEvent::progress(stage, message)).await?;
        Ok(())
    }

    async fn run_stages(
        &self,
        job: &Job,
        provider_session: Option<String>,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        tracker: &mut StageTracker,
        carried: &mut Carried,
    ) -> Result<()> {
        emitter.emit(ProgressEvent::connected()).await?;
        emitter
            .emit(ProgressEvent::session_name(job.session_name()))
            .await?;

        Self::enter(tracker, emitter, Stage::PreparingWorkspace, "Preparing workspace").await?;
        let workspace = self.prepare_workspace(job, emitter, cancel).await?;
        carried.workspace = Some(workspace.path.clone());

        Self::enter(
            tracker,
            emitter,
            Stage::ExecutingProvider,
            format!("Running {}", job.provider),
        )
        .await?;
        carried.provider_session_id = self
            .execute_provider(job, &workspace, provider_session, emitter, cancel)
            .await?;

        if job.auto_commit {
            let outcome =
                cancellable(cancel, self.auto_commit.run(&workspace, emitter, tracker)).await?;
            carried.auto_commit = Some(outcome);
        }

        Ok(())
    }

    async fn prepare_workspace(
        &self,
        job: &Job,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<Workspace> {
        let target = self.workspace_root.join(job.id.to_string());
        let preparer: &dyn WorkspacePreparer = match job.repository {
            Some(_) => self.repo_preparer.as_ref(),
            None => &self.scratch,
        };

        let path = cancellable(cancel, preparer.prepare(job, &target, emitter)).await?;
        let branch = job
            .repository
            .as_ref()
            .map(|r| r.branch.clone())
            .unwrap_or_default();
        let workspace = Workspace::new(job.id.to_string(), path, branch);

        let Some(work_branch) = job
            .repository
            .as_ref()
            .and_then(|r| r.work_branch.as_deref())
        else {
            return Ok(workspace);
        };

        cancellable(cancel, async {
            self.vcs
                .create_branch(&workspace, work_branch)
                .await
                .map_err(|e| OrchestratorError::Workspace(redact(&e.to_string())))
        })
        .await?;
        info!(job_id = %job.id, branch = %work_branch, "Work branch created");
        emitter
            .emit(ProgressEvent::branch_created(work_branch))
            .await?;

        Ok(workspace.with_branch(work_branch))
    }

    /// Forwards every provider message and returns the provider-native
    /// session id, if one was reported.
    async fn execute_provider(
        &self,
        job: &Job,
        workspace: &Workspace,
        provider_session: Option<String>,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let executor = self.providers.get(job.provider)?;
        let request = ExecutionRequest {
            job_id: job.id,
            prompt: job.instruction.clone(),
            workspace: workspace.path.clone(),
            provider: job.provider,
            options: job.options.clone(),
            resume_session_id: provider_session.clone(),
            credentials: job.credentials.clone(),
        };

        let mut stream = cancellable(cancel, executor.execute(request)).await?;
        let mut provider_session_id = provider_session;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(ProviderMessage::Output(message))) => {
                    emitter.emit(ProgressEvent::provider_output(message)).await?;
                }
                Some(Ok(ProviderMessage::Finished {
                    provider_session_id: reported,
                })) => {
                    if reported.is_some() {
                        provider_session_id = reported;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        Ok(provider_session_id)
    }
}
