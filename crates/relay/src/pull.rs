use std::path::PathBuf;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RelayError, Result};
use crate::stream::{ByteStream, SseRelay};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub repo_url: String,
    pub branch: String,
    pub target_directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Record sent by the repository-pull service.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PullRecord {
    Progress {
        status: String,
        #[serde(default)]
        message: String,
    },
    Complete {
        #[serde(rename = "targetPath")]
        target_path: String,
        #[serde(default)]
        message: String,
    },
    Error {
        error: String,
    },
    #[serde(other)]
    Unknown,
}

/// Progress of a pull. Downstream `error` records never become updates;
/// they end the pull with [`RelayError::Downstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullUpdate {
    Progress { status: String, message: String },
    Complete { target_path: String, message: String },
    Unknown,
}

impl PullUpdate {
    fn from_record(record: serde_json::Value) -> Result<Self> {
        match serde_json::from_value(record).unwrap_or(PullRecord::Unknown) {
            PullRecord::Progress { status, message } => Ok(Self::Progress { status, message }),
            PullRecord::Complete {
                target_path,
                message,
            } => Ok(Self::Complete {
                target_path,
                message,
            }),
            PullRecord::Error { error } => Err(RelayError::Downstream(error)),
            PullRecord::Unknown => Ok(Self::Unknown),
        }
    }
}

/// Client for the clone/pull service.
pub struct RepoPullClient {
    base_url: String,
    client: Client,
}

impl RepoPullClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn pull(&self, request: &PullRequest) -> Result<PullSession> {
        info!(
            branch = %request.branch,
            target = %request.target_directory,
            "Requesting repository pull"
        );
        let url = format!("{}/pull", self.base_url);
        let relay = SseRelay::post(&self.client, &url, request).await?;
        Ok(PullSession { relay })
    }
}

/// One in-flight pull.
pub struct PullSession {
    relay: SseRelay<ByteStream>,
}

impl PullSession {
    /// Next update from the service. An `error` record ends the pull with
    /// [`RelayError::Downstream`].
    pub async fn next_update(&mut self) -> Option<Result<PullUpdate>> {
        Some(self.relay.next_record().await?.and_then(PullUpdate::from_record))
    }

    /// Path reported by the final `complete` record.
    pub fn target_path(&self) -> Result<PathBuf> {
        match self.relay.last_record().cloned().map(PullUpdate::from_record) {
            Some(Ok(PullUpdate::Complete { target_path, .. })) => Ok(PathBuf::from(target_path)),
            _ => Err(RelayError::InvalidResponse(
                "pull stream ended without a complete record".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> PullRequest {
        PullRequest {
            repo_url: "https://github.com/acme/app.git".to_string(),
            branch: "main".to_string(),
            target_directory: "/workspaces/job-1".to_string(),
            token: None,
        }
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
    }

    #[test]
    fn test_update_parsing() {
        let update = PullUpdate::from_record(serde_json::json!({
            "type": "progress", "status": "cloning", "message": "Cloning"
        }))
        .unwrap();
        assert_eq!(
            update,
            PullUpdate::Progress {
                status: "cloning".to_string(),
                message: "Cloning".to_string()
            }
        );
        assert_eq!(
            PullUpdate::from_record(serde_json::json!({"type": "heartbeat"})).unwrap(),
            PullUpdate::Unknown
        );
        assert_eq!(
            PullUpdate::from_record(serde_json::json!({"no_type": true})).unwrap(),
            PullUpdate::Unknown
        );
        assert!(matches!(
            PullUpdate::from_record(serde_json::json!({"type": "error", "error": "denied"})),
            Err(RelayError::Downstream(ref e)) if e == "denied"
        ));
    }

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["repoUrl"], "https://github.com/acme/app.git");
        assert_eq!(json["targetDirectory"], "/workspaces/job-1");
        assert!(json.get("token").is_none());
    }

    #[tokio::test]
    async fn test_pull_relays_updates_and_target_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pull"))
            .and(body_partial_json(serde_json::json!({"branch": "main"})))
            .respond_with(sse(concat!(
                "data: {\"type\":\"progress\",\"status\":\"cloning\",\"message\":\"Cloning\"}\n\n",
                "data: {\"type\":\"complete\",\"targetPath\":\"/workspaces/job-1\"}\n\n",
            )))
            .mount(&server)
            .await;

        let client = RepoPullClient::new(format!("{}/", server.uri()));
        let mut session = client.pull(&request()).await.unwrap();

        let first = session.next_update().await.unwrap().unwrap();
        assert!(matches!(first, PullUpdate::Progress { ref status, .. } if status == "cloning"));
        let second = session.next_update().await.unwrap().unwrap();
        assert!(matches!(second, PullUpdate::Complete { .. }));
        assert!(session.next_update().await.is_none());

        assert_eq!(
            session.target_path().unwrap(),
            PathBuf::from("/workspaces/job-1")
        );
    }

    #[tokio::test]
    async fn test_pull_error_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pull"))
            .respond_with(sse(
                "data: {\"type\":\"error\",\"error\":\"Repository not found\"}\n\n",
            ))
            .mount(&server)
            .await;

        let client = RepoPullClient::new(server.uri());
        let mut session = client.pull(&request()).await.unwrap();

        let err = session.next_update().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Repository not found");
        assert!(session.target_path().is_err());
    }

    #[tokio::test]
    async fn test_pull_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pull"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = RepoPullClient::new(server.uri());
        let err = client.pull(&request()).await.err().unwrap();
        assert!(matches!(err, RelayError::Status { status: 503, ref body } if body == "overloaded"));
    }
}
