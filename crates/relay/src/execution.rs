use jobrelay_core::{Provider, ProviderOptions};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{RelayError, Result};
use crate::stream::{ByteStream, SseRelay};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    pub prompt: String,
    pub workspace: String,
    pub provider: Provider,
    pub options: ProviderOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

/// Client for the provider-execution service.
pub struct ExecutionClient {
    base_url: String,
    client: Client,
}

impl ExecutionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn execute(&self, payload: &ExecutionPayload) -> Result<ExecutionSession> {
        info!(
            provider = %payload.provider,
            workspace = %payload.workspace,
            resume = payload.resume_session_id.is_some(),
            "Starting remote execution"
        );
        let url = format!("{}/execute", self.base_url);
        let relay = SseRelay::post(&self.client, &url, payload).await?;
        Ok(ExecutionSession { relay })
    }
}

/// One in-flight execution.
pub struct ExecutionSession {
    relay: SseRelay<ByteStream>,
}

impl ExecutionSession {
    /// Next provider message, untouched. A record with `"type": "error"` is
    /// returned as [`RelayError::Downstream`].
    pub async fn next_message(&mut self) -> Option<Result<Value>> {
        let record = match self.relay.next_record().await? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };

        if record.get("type").and_then(Value::as_str) == Some("error") {
            let message = record
                .get("error")
                .or_else(|| record.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("execution service reported an error")
                .to_string();
            return Some(Err(RelayError::Downstream(message)));
        }

        Some(Ok(record))
    }

    /// Provider-native session id carried by the final summary record.
    pub fn provider_session_id(&self) -> Option<String> {
        let last = self.relay.last_record()?;
        last.get("sessionId")
            .or_else(|| last.get("session_id"))
            .and_then(Value::as_str)
            .map(String::from)
    }
}
