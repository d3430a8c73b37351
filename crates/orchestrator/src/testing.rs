//! In-memory fakes of the pipeline's capabilities.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use events::{EventEmitter, ProgressEvent, RepoPullStatus};
use futures::StreamExt;
use jobrelay_core::Job;
use serde_json::Value;
use vcs::{VcsError, VersionControl, Workspace};

use crate::commit_message::CommitMessageGenerator;
use crate::error::{OrchestratorError, Result};
use crate::provider::{ExecutionRequest, ProviderExecutor, ProviderMessage, ProviderStream};
use crate::workspace::WorkspacePreparer;

#[derive(Default)]
struct VcsLog {
    branches: Vec<String>,
    messages: Vec<String>,
    pushes: Vec<(String, String)>,
}

pub struct FakeVcs {
    dirty: bool,
    diff: String,
    commit_error: Option<String>,
    push_error: Option<String>,
    log: Mutex<VcsLog>,
}

impl FakeVcs {
    pub const HASH: &'static str = "3f2a9c1d8e7b6a5f4e3d2c1b0a9f8e7d6c5b4a39";

    fn new(dirty: bool) -> Self {
        Self {
            dirty,
            diff: "+hello\n".to_string(),
            commit_error: None,
            push_error: None,
            log: Mutex::new(VcsLog::default()),
        }
    }

    pub fn clean() -> Self {
        Self::new(false)
    }

    pub fn dirty() -> Self {
        Self::new(true)
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }

    pub fn failing_commit(mut self, error: impl Into<String>) -> Self {
        self.commit_error = Some(error.into());
        self
    }

    pub fn failing_push(mut self, error: impl Into<String>) -> Self {
        self.push_error = Some(error.into());
        self
    }

    pub fn commit_count(&self) -> usize {
        self.log.lock().unwrap().messages.len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.log.lock().unwrap().messages.clone()
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().pushes.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.log.lock().unwrap().branches.clone()
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn is_initialized(&self, _path: &Path) -> vcs::Result<bool> {
        Ok(true)
    }

    async fn clone_repo(&self, _url: &str, branch: &str, target: &Path) -> vcs::Result<Workspace> {
        Ok(Workspace::new("fake", target.to_path_buf(), branch))
    }

    async fn pull(&self, _workspace: &Workspace, _url: &str) -> vcs::Result<()> {
        Ok(())
    }

    async fn create_branch(&self, _workspace: &Workspace, branch: &str) -> vcs::Result<()> {
        self.log.lock().unwrap().branches.push(branch.to_string());
        Ok(())
    }

    async fn current_branch(&self, workspace: &Workspace) -> vcs::Result<String> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .branches
            .last()
            .cloned()
            .unwrap_or_else(|| workspace.branch_name.clone()))
    }

    async fn has_uncommitted_changes(&self, _workspace: &Workspace) -> vcs::Result<bool> {
        Ok(self.dirty && self.commit_count() == 0)
    }

    async fn get_status(&self, _workspace: &Workspace) -> vcs::Result<String> {
        Ok(if self.dirty { " M src/lib.rs\n" } else { "" }.to_string())
    }

    async fn get_diff(&self, _workspace: &Workspace) -> vcs::Result<String> {
        Ok(self.diff.clone())
    }

    async fn commit(&self, _workspace: &Workspace, message: &str) -> vcs::Result<String> {
        if let Some(error) = &self.commit_error {
            return Err(VcsError::CommandFailed(error.clone()));
        }
        self.log.lock().unwrap().messages.push(message.to_string());
        Ok(Self::HASH.to_string())
    }

    async fn push(&self, _workspace: &Workspace, remote: &str, branch: &str) -> vcs::Result<()> {
        if let Some(error) = &self.push_error {
            return Err(VcsError::Remote(error.clone()));
        }
        self.log
            .lock()
            .unwrap()
            .pushes
            .push((remote.to_string(), branch.to_string()));
        Ok(())
    }
}

enum Reply {
    Message(String),
    Fail,
    Hang,
}

pub struct FakeGenerator {
    reply: Reply,
    diffs: Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            diffs: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(message: impl Into<String>) -> Self {
        Self::new(Reply::Message(message.into()))
    }

    pub fn failing() -> Self {
        Self::new(Reply::Fail)
    }

    pub fn hanging() -> Self {
        Self::new(Reply::Hang)
    }

    pub fn seen_diffs(&self) -> Vec<String> {
        self.diffs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitMessageGenerator for FakeGenerator {
    async fn generate(&self, _status: &str, diff: &str) -> Result<String> {
        self.diffs.lock().unwrap().push(diff.to_string());
        match &self.reply {
            Reply::Message(message) => Ok(message.clone()),
            Reply::Fail => Err(OrchestratorError::CommitMessage("upstream 500".to_string())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(OrchestratorError::CommitMessage("unreachable".to_string()))
            }
        }
    }
}

/// Replays canned provider messages.
pub struct FakeExecutor {
    outputs: Vec<Value>,
    error: Option<String>,
    provider_session_id: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl FakeExecutor {
    pub fn new(outputs: Vec<Value>) -> Self {
        Self {
            outputs,
            error: None,
            provider_session_id: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_with(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.provider_session_id = Some(id.into());
        self
    }

    /// Waits this long before each message.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderExecutor for FakeExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderStream> {
        self.requests.lock().unwrap().push(request);

        let mut items: Vec<Result<ProviderMessage>> = self
            .outputs
            .iter()
            .cloned()
            .map(|v| Ok(ProviderMessage::Output(v)))
            .collect();
        items.push(match &self.error {
            Some(error) => Err(OrchestratorError::Provider(error.clone())),
            None => Ok(ProviderMessage::Finished {
                provider_session_id: self.provider_session_id.clone(),
            }),
        });

        let delay = self.delay;
        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}

/// Creates the target directory, or fails with a fixed error.
pub struct FakePreparer {
    error: Option<String>,
}

impl FakePreparer {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

#[async_trait]
impl WorkspacePreparer for FakePreparer {
    async fn prepare(&self, _job: &Job, target: &Path, emitter: &EventEmitter) -> Result<PathBuf> {
        emitter
            .emit(ProgressEvent::repo_pull(RepoPullStatus::Cloning, "Cloning"))
            .await?;
        if let Some(error) = &self.error {
            return Err(OrchestratorError::Workspace(error.clone()));
        }
        tokio::fs::create_dir_all(target).await?;
        emitter
            .emit(ProgressEvent::repo_pull(RepoPullStatus::Complete, "Repository ready"))
            .await?;
        Ok(target.to_path_buf())
    }
}
