use async_trait::async_trait;
use futures::StreamExt;
use relay::{ExecutionClient, ExecutionPayload, ExecutionSession};
use tracing::{debug, warn};

use super::{ExecutionRequest, ProviderExecutor, ProviderMessage, ProviderStream};
use crate::error::{OrchestratorError, Result};

/// Runs providers through the downstream execution service.
pub struct RemoteExecutor {
    client: ExecutionClient,
}

impl RemoteExecutor {
    pub fn new(client: ExecutionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderExecutor for RemoteExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderStream> {
        let payload = ExecutionPayload {
            prompt: request.prompt,
            workspace: request.workspace.display().to_string(),
            provider: request.provider,
            options: request.options,
            resume_session_id: request.resume_session_id,
            credentials: request.credentials,
        };

        let session = self
            .client
            .execute(&payload)
            .await
            .map_err(|e| OrchestratorError::Provider(e.to_string()))?;

        let job_id = request.job_id;
        let stream = futures::stream::unfold(Some(session), move |state| async move {
            let mut session: ExecutionSession = state?;
            match session.next_message().await {
                Some(Ok(message)) => Some((Ok(ProviderMessage::Output(message)), Some(session))),
                Some(Err(e)) => {
                    warn!(job_id = %job_id, error = %e, "Execution service failed");
                    Some((Err(OrchestratorError::Provider(e.to_string())), None))
                }
                None => {
                    let provider_session_id = session.provider_session_id();
                    debug!(job_id = %job_id, ?provider_session_id, "Execution stream ended");
                    Some((
                        Ok(ProviderMessage::Finished {
                            provider_session_id,
                        }),
                        None,
                    ))
                }
            }
        });

        Ok(stream.boxed())
    }
}
