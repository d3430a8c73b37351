use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::provider::{Provider, ProviderOptions};
use crate::error::{CoreError, Result};

pub const DEFAULT_BRANCH: &str = "main";

const SESSION_NAME_MAX_CHARS: usize = 60;
const REDACTED: &str = "***";

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// Repository the job works in.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryBinding {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Accepted on input only; never serialized back out.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    /// Branch to create on top of `branch` once the workspace is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_branch: Option<String>,
}

impl RepositoryBinding {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: default_branch(),
            access_token: None,
            work_branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_work_branch(mut self, branch: impl Into<String>) -> Self {
        self.work_branch = Some(branch.into());
        self
    }

    fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(CoreError::validation("repository.url is required"));
        }
        if !is_supported_url(url) {
            return Err(CoreError::validation(format!(
                "repository.url has an unsupported scheme: {}",
                url
            )));
        }
        validate_branch_name("repository.branch", &self.branch)?;
        if let Some(work_branch) = &self.work_branch {
            validate_branch_name("repository.workBranch", work_branch)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RepositoryBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryBinding")
            .field("url", &self.url)
            .field("branch", &self.branch)
            .field("access_token", &self.access_token.as_ref().map(|_| REDACTED))
            .field("work_branch", &self.work_branch)
            .finish()
    }
}

/// Inbound request body, exactly as the caller sent it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub instruction: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub credentials: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    #[serde(default)]
    pub options: ProviderOptions,
}

impl JobRequest {
    pub fn new(instruction: impl Into<String>, provider: Provider) -> Self {
        Self {
            instruction: instruction.into(),
            provider,
            credentials: None,
            resume_session_id: None,
            repository: None,
            auto_commit: None,
            options: ProviderOptions::default(),
        }
    }

    pub fn with_repository(mut self, repository: RepositoryBinding) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = Some(auto_commit);
        self
    }

    pub fn with_resume_session(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session_id = Some(session_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruction.trim().is_empty() {
            return Err(CoreError::validation("instruction is required"));
        }
        if let Some(credentials) = &self.credentials {
            if !credentials.is_object() {
                return Err(CoreError::validation("credentials must be a JSON object"));
            }
        }
        if let Some(session_id) = &self.resume_session_id {
            if session_id.trim().is_empty() {
                return Err(CoreError::validation("resumeSessionId must not be empty"));
            }
        }
        if let Some(repository) = &self.repository {
            repository.validate()?;
        }
        Ok(())
    }
}

/// One accepted request, owned by the job runner until the pipeline ends.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub instruction: String,
    pub provider: Provider,
    #[serde(skip)]
    pub credentials: Option<serde_json::Value>,
    pub resume_session_id: Option<String>,
    pub repository: Option<RepositoryBinding>,
    pub auto_commit: bool,
    pub options: ProviderOptions,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Validates `request` and turns it into a job with a fresh id.
    ///
    /// Auto-commit only applies to repository-bound jobs; for those it
    /// defaults to on.
    pub fn from_request(request: JobRequest) -> Result<Self> {
        request.validate()?;

        let auto_commit = request.repository.is_some() && request.auto_commit.unwrap_or(true);

        Ok(Self {
            id: Uuid::new_v4(),
            instruction: request.instruction,
            provider: request.provider,
            credentials: request.credentials,
            resume_session_id: request.resume_session_id,
            repository: request.repository,
            auto_commit,
            options: request.options,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Short human label derived from the first line of the instruction.
    pub fn session_name(&self) -> String {
        let first_line = self
            .instruction
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();

        if first_line.chars().count() <= SESSION_NAME_MAX_CHARS {
            first_line.to_string()
        } else {
            let truncated: String = first_line.chars().take(SESSION_NAME_MAX_CHARS).collect();
            format!("{}...", truncated.trim_end())
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("instruction", &self.instruction)
            .field("provider", &self.provider)
            .field("credentials", &self.credentials.as_ref().map(|_| REDACTED))
            .field("resume_session_id", &self.resume_session_id)
            .field("repository", &self.repository)
            .field("auto_commit", &self.auto_commit)
            .field("options", &self.options)
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn is_supported_url(url: &str) -> bool {
    ["https://", "http://", "ssh://", "git@", "file://", "/"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

fn branch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("valid branch regex"))
}

fn validate_branch_name(field: &str, branch: &str) -> Result<()> {
    let invalid = branch.is_empty()
        || !branch_pattern().is_match(branch)
        || branch.contains("..")
        || branch.contains("//")
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock");

    if invalid {
        return Err(CoreError::validation(format!(
            "{} is not a valid branch name: {:?}",
            field, branch
        )));
    }
    Ok(())
}
