use events::{ErrorCode, Stage};
use jobrelay_core::{CoreError, Provider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(String),

    #[error("Workspace preparation failed: {0}")]
    Workspace(String),

    #[error(transparent)]
    Vcs(#[from] vcs::VcsError),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No executor configured for provider: {0}")]
    ProviderNotConfigured(Provider),

    #[error("Commit message generation failed: {0}")]
    CommitMessage(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Worker is busy")]
    Busy,

    #[error("Worker has retired")]
    Retired,

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Event emission failed: {0}")]
    Emit(#[from] events::EmitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn invalid_transition(from: Option<Stage>, to: Stage) -> Self {
        Self::InvalidTransition {
            from: from.map_or("accepted", |s| s.as_str()).to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// Classification carried by the outbound `error` event.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Workspace(_) | Self::Vcs(_) => ErrorCode::GithubError,
            Self::Provider(_) | Self::ProviderNotConfigured(_) => ErrorCode::ProviderError,
            Self::CommitMessage(_)
            | Self::Execution(_)
            | Self::Cancelled
            | Self::InvalidTransition { .. }
            | Self::Emit(_) => ErrorCode::ExecutionError,
            Self::Busy | Self::Retired | Self::Database(_) | Self::Io(_) => ErrorCode::UnknownError,
        }
    }

    /// True for rejections that happen before a job is accepted.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Busy | Self::Retired)
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(e: CoreError) -> Self {
        Self::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OrchestratorError::Validation("x".into()).code(),
            ErrorCode::ValidationError
        );
        assert_eq!(
            OrchestratorError::Workspace("clone failed".into()).code(),
            ErrorCode::GithubError
        );
        assert_eq!(
            OrchestratorError::Vcs(vcs::VcsError::Remote("denied".into())).code(),
            ErrorCode::GithubError
        );
        assert_eq!(
            OrchestratorError::ProviderNotConfigured(Provider::Gemini).code(),
            ErrorCode::ProviderError
        );
        assert_eq!(OrchestratorError::Cancelled.code(), ErrorCode::ExecutionError);
        assert_eq!(OrchestratorError::Busy.code(), ErrorCode::UnknownError);
    }

    #[test]
    fn test_core_error_becomes_validation() {
        let err: OrchestratorError = CoreError::validation("instruction is required").into();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_vcs_remote_display_is_transparent() {
        let err = OrchestratorError::from(vcs::VcsError::Remote("Authentication failed".into()));
        assert_eq!(err.to_string(), "Authentication failed");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = OrchestratorError::invalid_transition(None, Stage::ExecutingProvider);
        assert_eq!(
            err.to_string(),
            "Invalid stage transition from accepted to executing_provider"
        );
    }
}
