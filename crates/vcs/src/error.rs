use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("VCS not initialized in repository: {0}")]
    NotInitialized(String),

    /// Clone, pull or push rejected by the remote. Displays git's own summary.
    #[error("{0}")]
    Remote(String),

    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, VcsError>;
