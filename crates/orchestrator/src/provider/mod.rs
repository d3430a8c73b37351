//! Provider execution capability.
//!
//! The pipeline never looks inside provider messages; it only chooses which
//! executor to hand the job to.

mod command;
mod remote;

pub use command::{CommandExecutor, CommandSpec};
pub use remote::RemoteExecutor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use jobrelay_core::{Provider, ProviderOptions};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Everything an executor needs to run one instruction.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: Uuid,
    pub prompt: String,
    pub workspace: PathBuf,
    pub provider: Provider,
    pub options: ProviderOptions,
    /// Provider-native session to continue, if resuming.
    pub resume_session_id: Option<String>,
    pub credentials: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    /// Opaque provider output, forwarded verbatim.
    Output(Value),
    /// The run ended normally.
    Finished { provider_session_id: Option<String> },
}

pub type ProviderStream = BoxStream<'static, Result<ProviderMessage>>;

#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ProviderStream>;
}

/// Maps each provider to the executor that runs it.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    executors: HashMap<Provider, Arc<dyn ProviderExecutor>>,
    fallback: Option<Arc<dyn ProviderExecutor>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Provider, executor: Arc<dyn ProviderExecutor>) -> Self {
        self.executors.insert(provider, executor);
        self
    }

    /// Executor used for providers without a dedicated registration.
    pub fn with_fallback(mut self, executor: Arc<dyn ProviderExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderExecutor>> {
        self.executors
            .get(&provider)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or(OrchestratorError::ProviderNotConfigured(provider))
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty() && self.fallback.is_none()
    }
}

/// Reads the provider-native session id from a summary record.
pub(crate) fn session_id_of(record: &Value) -> Option<String> {
    record
        .get("sessionId")
        .or_else(|| record.get("session_id"))
        .and_then(Value::as_str)
        .map(String::from)
}
