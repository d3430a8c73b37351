use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{session_id_of, ExecutionRequest, ProviderExecutor, ProviderMessage, ProviderStream};
use crate::error::{OrchestratorError, Result};

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const STDERR_TAIL_CHARS: usize = 500;

/// Command line of a locally installed provider CLI.
///
/// `{prompt}` inside an argument is replaced with the instruction; without a
/// placeholder the instruction is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn render_args(&self, prompt: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(PROMPT_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(PROMPT_PLACEHOLDER, prompt)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(prompt.to_string());
        }
        args
    }
}

/// Spawns a provider CLI inside the workspace and relays its stdout, one
/// message per line.
pub struct CommandExecutor {
    spec: CommandSpec,
}

impl CommandExecutor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

struct RunningCommand {
    program: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    line: Vec<u8>,
    stderr: JoinHandle<String>,
    provider_session_id: Option<String>,
}

enum Step {
    Skip(RunningCommand),
    Yield(Result<ProviderMessage>, Option<RunningCommand>),
}

impl RunningCommand {
    async fn next_step(mut self) -> Step {
        self.line.clear();
        match self.stdout.read_until(b'\n', &mut self.line).await {
            Ok(0) => Step::Yield(self.finish().await, None),
            Ok(_) => {
                // Provider CLIs are not bound to UTF-8; decode what we can.
                let parsed = parse_line(&String::from_utf8_lossy(&self.line));
                match parsed {
                    Some(message) => {
                        if let Some(id) = session_id_of(&message) {
                            self.provider_session_id = Some(id);
                        }
                        Step::Yield(Ok(ProviderMessage::Output(message)), Some(self))
                    }
                    None => Step::Skip(self),
                }
            }
            Err(e) => {
                let _ = self.child.kill().await;
                Step::Yield(
                    Err(OrchestratorError::Provider(format!(
                        "failed to read {} output: {}",
                        self.program, e
                    ))),
                    None,
                )
            }
        }
    }

    async fn finish(mut self) -> Result<ProviderMessage> {
        let status = self.child.wait().await?;
        let stderr = self.stderr.await.unwrap_or_default();

        if status.success() {
            info!(program = %self.program, "Provider command finished");
            return Ok(ProviderMessage::Finished {
                provider_session_id: self.provider_session_id,
            });
        }

        let tail = stderr_tail(&stderr);
        warn!(program = %self.program, %status, stderr = %tail, "Provider command failed");
        Err(OrchestratorError::Provider(if tail.is_empty() {
            format!("{} exited with {}", self.program, status)
        } else {
            format!("{} exited with {}: {}", self.program, status, tail)
        }))
    }
}

/// Blank lines are skipped; lines that are not JSON become text messages.
fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).unwrap_or_else(|_| json!({"type": "text", "text": line})))
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

#[async_trait]
impl ProviderExecutor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderStream> {
        let args = self.spec.render_args(&request.prompt);
        debug!(
            job_id = %request.job_id,
            program = %self.spec.program,
            workspace = %request.workspace.display(),
            "Spawning provider command"
        );

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&args)
            .current_dir(&request.workspace)
            .env("JOBRELAY_JOB_ID", request.job_id.to_string())
            .env("JOBRELAY_PROVIDER", request.provider.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &request.options.model {
            cmd.env("JOBRELAY_MODEL", model);
        }
        if let Some(session) = &request.resume_session_id {
            cmd.env("JOBRELAY_RESUME_SESSION", session);
        }

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::Provider(format!("failed to start {}: {}", self.spec.program, e))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            OrchestratorError::Provider(format!("{} has no stdout", self.spec.program))
        })?;
        let stderr = child.stderr.take();
        let stderr = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let running = RunningCommand {
            program: self.spec.program.clone(),
            child,
            stdout: BufReader::new(stdout),
            line: Vec::new(),
            stderr,
            provider_session_id: request.resume_session_id,
        };

        let stream = futures::stream::unfold(Some(running), |state| async move {
            let mut running = state?;
            loop {
                match running.next_step().await {
                    Step::Skip(same) => running = same,
                    Step::Yield(item, next) => return Some((item, next)),
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{Provider, ProviderOptions};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn request(workspace: &std::path::Path, prompt: &str) -> ExecutionRequest {
        ExecutionRequest {
            job_id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            workspace: workspace.to_path_buf(),
            provider: Provider::Codex,
            options: ProviderOptions::default(),
            resume_session_id: None,
            credentials: None,
        }
    }

    fn sh(script: &str) -> CommandExecutor {
        CommandExecutor::new(CommandSpec::new("sh").with_args(["-c", script, "provider"]))
    }

    async fn run(executor: &CommandExecutor, req: ExecutionRequest) -> Vec<Result<ProviderMessage>> {
        executor.execute(req).await.unwrap().collect().await
    }

    #[test]
    fn test_render_args() {
        let spec = CommandSpec::new("claude").with_args(["-p", "{prompt}", "--json"]);
        assert_eq!(spec.render_args("do it"), vec!["-p", "do it", "--json"]);

        let spec = CommandSpec::new("codex").with_args(["exec"]);
        assert_eq!(spec.render_args("do it"), vec!["exec", "do it"]);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  "), None);
        assert_eq!(parse_line("{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(
            parse_line("plain words"),
            Some(json!({"type": "text", "text": "plain words"}))
        );
        assert_eq!(
            parse_line("with newline\r\n"),
            Some(json!({"type": "text", "text": "with newline"}))
        );
    }

    #[tokio::test]
    async fn test_json_lines_and_text_lines() {
        let dir = TempDir::new().unwrap();
        let executor = sh(
            "echo '{\"type\":\"assistant\",\"n\":1}'; echo; echo \"prompt was $1\"; echo '{\"type\":\"result\",\"session_id\":\"native-7\"}'",
        );

        let messages = run(&executor, request(dir.path(), "hello")).await;
        let messages: Vec<ProviderMessage> = messages.into_iter().map(|m| m.unwrap()).collect();

        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages[0],
            ProviderMessage::Output(json!({"type": "assistant", "n": 1}))
        );
        assert_eq!(
            messages[1],
            ProviderMessage::Output(json!({"type": "text", "text": "prompt was hello"}))
        );
        assert_eq!(
            messages[3],
            ProviderMessage::Finished {
                provider_session_id: Some("native-7".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_passed_through_as_text() {
        let dir = TempDir::new().unwrap();
        let executor = sh("printf 'caf\\351\\n'; echo '{\"type\":\"assistant\"}'");

        let messages = run(&executor, request(dir.path(), "go")).await;
        let messages: Vec<ProviderMessage> = messages.into_iter().map(|m| m.unwrap()).collect();

        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            ProviderMessage::Output(json!({"type": "text", "text": "caf\u{fffd}"}))
        );
        assert_eq!(
            messages[1],
            ProviderMessage::Output(json!({"type": "assistant"}))
        );
        assert!(matches!(messages[2], ProviderMessage::Finished { .. }));
    }

    #[tokio::test]
    async fn test_runs_inside_workspace() {
        let dir = TempDir::new().unwrap();
        let executor = sh("echo data > produced.txt");

        let messages = run(&executor, request(dir.path(), "go")).await;
        assert!(matches!(
            messages.last(),
            Some(Ok(ProviderMessage::Finished { .. }))
        ));
        assert!(dir.path().join("produced.txt").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_provider_error() {
        let dir = TempDir::new().unwrap();
        let executor = sh("echo '{\"type\":\"start\"}'; echo 'quota exceeded' >&2; exit 3");

        let messages = run(&executor, request(dir.path(), "go")).await;
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_ok());
        let err = messages[1].as_ref().unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(ref m) if m.contains("quota exceeded")));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(CommandSpec::new("jobrelay-no-such-provider-cli"));
        let err = executor.execute(request(dir.path(), "go")).await.err().unwrap();
        assert!(matches!(err, OrchestratorError::Provider(ref m) if m.contains("failed to start")));
    }

    #[test]
    fn test_stderr_tail() {
        let long = "x".repeat(STDERR_TAIL_CHARS + 10);
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_CHARS);
        assert_eq!(stderr_tail("  short \n"), "short");
    }
}
