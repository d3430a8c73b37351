//! Job orchestration for jobrelay.
//!
//! A [`JobRunner`] accepts one [`jobrelay_core::Job`] at a time and hands it
//! to the [`Pipeline`], which prepares a workspace, runs the provider and,
//! for repository-bound jobs, commits and pushes whatever the provider
//! changed. Every step is reported as a [`events::ProgressEvent`].

pub mod auto_commit;
pub mod commit_message;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod recorder;
pub mod runner;
pub mod stage;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use auto_commit::{AutoCommit, AutoCommitConfig, AutoCommitOutcome};
pub use commit_message::{ChatCompletionGenerator, CommitMessageGenerator, FALLBACK_COMMIT_MESSAGE};
pub use error::{OrchestratorError, Result};
pub use pipeline::{Pipeline, TerminalOutcome};
pub use provider::{
    CommandExecutor, CommandSpec, ExecutionRequest, ProviderExecutor, ProviderMessage,
    ProviderRegistry, RemoteExecutor,
};
pub use recorder::RecordingSink;
pub use runner::{ActiveJob, JobHandle, JobRunner, RunnerConfig, RunnerMode, RunnerState};
pub use stage::{StageScope, StageTracker};
pub use workspace::{LocalGitPreparer, RemotePullPreparer, ScratchPreparer, WorkspacePreparer};
