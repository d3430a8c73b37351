//! Event types for the jobrelay progress stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of record on the outbound stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First record of every stream
    Connected,
    /// Human label for the session
    SessionName,
    /// Generic pipeline progress
    Progress,
    /// Clone/pull progress relayed from workspace preparation
    RepoPull,
    /// A work branch was created in the workspace
    BranchCreated,
    /// Auto-commit sub-pipeline progress
    CommitProgress,
    /// Opaque provider message, passed through verbatim
    ProviderOutput,
    /// Terminal record of a job, success or failure
    JobCompleted,
    /// Fatal error, always followed by `JobCompleted`
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::SessionName => "session_name",
            Self::Progress => "progress",
            Self::RepoPull => "repo_pull",
            Self::BranchCreated => "branch_created",
            Self::CommitProgress => "commit_progress",
            Self::ProviderOutput => "provider_output",
            Self::JobCompleted => "job_completed",
            Self::Error => "error",
        }
    }
}

/// Canonical pipeline stages, in order.
///
/// `Pushed` and `PushFailed` are the two exits of `Pushing` and share a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreparingWorkspace,
    ExecutingProvider,
    Analyzing,
    GeneratingMessage,
    Committing,
    Committed,
    Pushing,
    Pushed,
    PushFailed,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreparingWorkspace => "preparing_workspace",
            Self::ExecutingProvider => "executing_provider",
            Self::Analyzing => "analyzing",
            Self::GeneratingMessage => "generating_message",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Pushing => "pushing",
            Self::Pushed => "pushed",
            Self::PushFailed => "push_failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparing_workspace" => Some(Self::PreparingWorkspace),
            "executing_provider" => Some(Self::ExecutingProvider),
            "analyzing" => Some(Self::Analyzing),
            "generating_message" => Some(Self::GeneratingMessage),
            "committing" => Some(Self::Committing),
            "committed" => Some(Self::Committed),
            "pushing" => Some(Self::Pushing),
            "pushed" => Some(Self::Pushed),
            "push_failed" => Some(Self::PushFailed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Position in the canonical order.
    pub fn rank(&self) -> u8 {
        match self {
            Self::PreparingWorkspace => 0,
            Self::ExecutingProvider => 1,
            Self::Analyzing => 2,
            Self::GeneratingMessage => 3,
            Self::Committing => 4,
            Self::Committed => 5,
            Self::Pushing => 6,
            Self::Pushed | Self::PushFailed => 7,
            Self::Completed => 8,
        }
    }

    /// Stages owned by the auto-commit sub-pipeline (excluding the shared `Completed`).
    pub fn is_commit_stage(&self) -> bool {
        (2..=7).contains(&self.rank())
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error classification carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ProviderError,
    ExecutionError,
    GithubError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::GithubError => "GITHUB_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status values of `repo_pull` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepoPullStatus {
    Cloning,
    Pulling,
    Complete,
}

impl RepoPullStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloning => "cloning",
            Self::Pulling => "pulling",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cloning" => Some(Self::Cloning),
            "pulling" => Some(Self::Pulling),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// One immutable record of job progress.
///
/// Built with one of the constructors below; `sequence`, `job_id` and
/// `timestamp` are stamped by the [`EventEmitter`](crate::EventEmitter) at
/// emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub sequence: u64,
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(
        rename = "duration_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
}

impl ProgressEvent {
    fn draft(event_type: EventType, stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            job_id: Uuid::nil(),
            event_type,
            stage,
            message: message.into(),
            timestamp: Utc::now(),
            branch: None,
            commit_message: None,
            commit_hash: None,
            error: None,
            code: None,
            session_id: None,
            duration_ms: None,
            payload: None,
        }
    }

    pub fn connected() -> Self {
        Self::draft(EventType::Connected, None, "Connection established")
    }

    pub fn session_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::draft(EventType::SessionName, None, name.clone())
            .with_payload(serde_json::json!({ "name": name }))
    }

    pub fn progress(stage: Stage, message: impl Into<String>) -> Self {
        Self::draft(EventType::Progress, Some(stage), message)
    }

    pub fn repo_pull(status: RepoPullStatus, message: impl Into<String>) -> Self {
        Self::draft(
            EventType::RepoPull,
            Some(Stage::PreparingWorkspace),
            message,
        )
        .with_payload(serde_json::json!({ "status": status.as_str() }))
    }

    pub fn branch_created(branch: impl Into<String>) -> Self {
        let branch = branch.into();
        Self::draft(
            EventType::BranchCreated,
            Some(Stage::PreparingWorkspace),
            format!("Created branch {}", branch),
        )
        .with_branch(branch)
    }

    pub fn commit(stage: Stage, message: impl Into<String>) -> Self {
        Self::draft(EventType::CommitProgress, Some(stage), message)
    }

    /// Wraps a provider message without looking inside it.
    pub fn provider_output(message: serde_json::Value) -> Self {
        Self::draft(
            EventType::ProviderOutput,
            Some(Stage::ExecutingProvider),
            String::new(),
        )
        .with_payload(message)
    }

    pub fn job_completed(session_id: impl Into<String>, duration_ms: u64) -> Self {
        let mut event = Self::draft(
            EventType::JobCompleted,
            Some(Stage::Completed),
            "Job completed",
        );
        event.session_id = Some(session_id.into());
        event.duration_ms = Some(duration_ms);
        event
    }

    pub fn error(code: ErrorCode, stage: Option<Stage>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut event = Self::draft(EventType::Error, stage, error.clone());
        event.error = Some(error);
        event.code = Some(code);
        event
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_commit_hash(mut self, hash: impl Into<String>) -> Self {
        self.commit_hash = Some(hash.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type == EventType::JobCompleted
    }

    /// `repo_pull` status, if this is a repo-pull event.
    pub fn repo_pull_status(&self) -> Option<RepoPullStatus> {
        if self.event_type != EventType::RepoPull {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(|s| s.as_str())
            .and_then(RepoPullStatus::parse)
    }
}
