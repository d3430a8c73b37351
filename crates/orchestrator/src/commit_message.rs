//! Commit message drafting from a working-tree diff.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

pub const FALLBACK_COMMIT_MESSAGE: &str = "chore: auto-commit changes";
pub const DEFAULT_MAX_DIFF_BYTES: usize = 8000;
pub const TRUNCATION_MARKER: &str = "\n... [diff truncated]";

const SYSTEM_PROMPT: &str = "You write git commit messages. Reply with a single conventional commit \
message (type: summary, at most 72 characters on the first line) describing the change. \
Reply with the message only.";

#[async_trait]
pub trait CommitMessageGenerator: Send + Sync {
    /// Drafts a message from `git status --porcelain` output and a bounded diff.
    async fn generate(&self, status: &str, diff: &str) -> Result<String>;
}

/// Cuts `diff` to at most `max_bytes` on a char boundary and appends a marker.
pub fn truncate_diff(diff: &str, max_bytes: usize) -> Cow<'_, str> {
    if diff.len() <= max_bytes {
        return Cow::Borrowed(diff);
    }
    let mut end = max_bytes;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}{}", &diff[..end], TRUNCATION_MARKER))
}

/// Strips code fences and wrapping quotes and keeps the first paragraph.
///
/// Returns `None` if nothing usable is left.
pub fn clean_message(raw: &str) -> Option<String> {
    let without_fences: Vec<&str> = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let text = without_fences.join("\n");

    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())?;

    let unquoted = paragraph
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();

    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Cow<'a, str>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatCompletionGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommitMessageGenerator for ChatCompletionGenerator {
    async fn generate(&self, status: &str, diff: &str) -> Result<String> {
        debug!(
            model = %self.model,
            diff_bytes = diff.len(),
            "Requesting commit message"
        );

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Cow::Borrowed(SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: Cow::Owned(format!(
                        "git status --porcelain:\n{}\n\ngit diff:\n{}",
                        status, diff
                    )),
                },
            ],
            temperature: 0.2,
            max_tokens: 120,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OrchestratorError::CommitMessage(e.to_string()))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status_code.as_u16(), body = %body, "Commit message request rejected");
            return Err(OrchestratorError::CommitMessage(format!(
                "HTTP {}",
                status_code.as_u16()
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::CommitMessage(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .as_deref()
            .and_then(clean_message)
            .ok_or_else(|| OrchestratorError::CommitMessage("empty completion".to_string()))
    }
}
