use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::auth::redact;
use crate::error::{Result, VcsError};
use crate::traits::{VersionControl, Workspace};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Identity used for commits made on behalf of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl GitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

pub struct GitVcs {
    timeout: Duration,
    author: Option<GitAuthor>,
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl GitVcs {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_GIT_TIMEOUT,
            author: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_author(mut self, author: GitAuthor) -> Self {
        self.author = Some(author);
        self
    }

    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String> {
        let printable = redact(&args.join(" "));
        debug!("Running git {} in {:?}", printable, cwd);

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcsError::CommandNotFound("git".to_string()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("git {} timed out", printable);
                return Err(VcsError::Timeout {
                    command: printable,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsError::CommandFailed(format!(
                "git {} failed: {}",
                printable,
                redact(stderr.trim())
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like `run_git`, but a failure is reported as the remote's own summary.
    async fn run_remote(&self, args: &[&str], cwd: &Path) -> Result<String> {
        self.run_git(args, cwd).await.map_err(|e| match e {
            VcsError::CommandFailed(detail) => VcsError::Remote(summarize_failure(&detail)),
            other => other,
        })
    }

    fn ensure_exists(workspace: &Workspace) -> Result<()> {
        if workspace.path.exists() {
            Ok(())
        } else {
            Err(VcsError::WorkspaceNotFound(workspace.id.clone()))
        }
    }

    fn path_str(path: &Path) -> Result<&str> {
        path.to_str()
            .ok_or_else(|| VcsError::InvalidPath(path.display().to_string()))
    }
}

/// Picks the most telling line of git's stderr, without the `fatal:` prefix.
fn summarize_failure(detail: &str) -> String {
    let stderr = detail
        .split_once(" failed: ")
        .map(|(_, rest)| rest)
        .unwrap_or(detail);

    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let line = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("fatal:") || l.starts_with("error:"))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("git remote operation failed");

    line.trim_start_matches("fatal:")
        .trim_start_matches("error:")
        .trim()
        .to_string()
}

#[async_trait]
impl VersionControl for GitVcs {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn is_available(&self) -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn is_initialized(&self, path: &Path) -> Result<bool> {
        Ok(path.join(".git").exists())
    }

    async fn clone_repo(&self, url: &str, branch: &str, target: &Path) -> Result<Workspace> {
        let parent = target
            .parent()
            .ok_or_else(|| VcsError::InvalidPath(target.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        self.run_remote(
            &[
                "clone",
                "--branch",
                branch,
                "--single-branch",
                url,
                Self::path_str(target)?,
            ],
            parent,
        )
        .await?;

        let id = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Workspace::new(id, target.to_path_buf(), branch))
    }

    async fn pull(&self, workspace: &Workspace, url: &str) -> Result<()> {
        Self::ensure_exists(workspace)?;

        self.run_git(&["remote", "set-url", "origin", url], &workspace.path)
            .await?;
        self.run_remote(&["fetch", "origin", &workspace.branch_name], &workspace.path)
            .await?;
        self.run_git(&["checkout", &workspace.branch_name], &workspace.path)
            .await?;
        self.run_remote(&["merge", "--ff-only", "FETCH_HEAD"], &workspace.path)
            .await?;

        Ok(())
    }

    async fn create_branch(&self, workspace: &Workspace, branch: &str) -> Result<()> {
        Self::ensure_exists(workspace)?;

        self.run_git(&["checkout", "-b", branch], &workspace.path)
            .await?;
        Ok(())
    }

    async fn current_branch(&self, workspace: &Workspace) -> Result<String> {
        Self::ensure_exists(workspace)?;

        let output = self
            .run_git(&["rev-parse", "--abbrev-ref", "HEAD"], &workspace.path)
            .await?;
        let branch = output.trim();
        if branch.is_empty() {
            return Err(VcsError::Parse("empty branch name".to_string()));
        }
        Ok(branch.to_string())
    }

    async fn has_uncommitted_changes(&self, workspace: &Workspace) -> Result<bool> {
        let status = self.get_status(workspace).await?;
        Ok(!status.trim().is_empty())
    }

    async fn get_status(&self, workspace: &Workspace) -> Result<String> {
        Self::ensure_exists(workspace)?;

        self.run_git(&["status", "--porcelain"], &workspace.path)
            .await
    }

    async fn get_diff(&self, workspace: &Workspace) -> Result<String> {
        Self::ensure_exists(workspace)?;

        let staged = self.run_git(&["diff", "--cached"], &workspace.path).await?;
        let unstaged = self.run_git(&["diff"], &workspace.path).await?;

        Ok(format!("{}{}", staged, unstaged))
    }

    async fn commit(&self, workspace: &Workspace, message: &str) -> Result<String> {
        Self::ensure_exists(workspace)?;

        self.run_git(&["add", "-A"], &workspace.path).await?;

        let name_cfg;
        let email_cfg;
        let mut args: Vec<&str> = Vec::new();
        if let Some(author) = &self.author {
            name_cfg = format!("user.name={}", author.name);
            email_cfg = format!("user.email={}", author.email);
            args.extend(["-c", name_cfg.as_str(), "-c", email_cfg.as_str()]);
        }
        args.extend(["commit", "-m", message]);
        self.run_git(&args, &workspace.path).await?;

        let output = self
            .run_git(&["rev-parse", "HEAD"], &workspace.path)
            .await?;

        Ok(output.trim().to_string())
    }

    async fn push(&self, workspace: &Workspace, remote: &str, branch: &str) -> Result<()> {
        Self::ensure_exists(workspace)?;

        self.run_remote(&["push", "-u", remote, branch], &workspace.path)
            .await?;

        Ok(())
    }
}
