mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use events::ProgressEvent;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NewSession, SessionRecord};

/// Durable, append-only storage for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &NewSession) -> Result<SessionRecord>;

    /// Appends `event` to the log of session `id`.
    async fn append_event(&self, id: Uuid, event: &ProgressEvent) -> Result<()>;

    async fn set_provider_session(&self, id: Uuid, provider_session_id: &str) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>>;

    /// Events with a sequence strictly greater than `after`, or all events
    /// when `after` is `None`.
    async fn events_after(&self, id: Uuid, after: Option<u64>) -> Result<Vec<ProgressEvent>>;
}
