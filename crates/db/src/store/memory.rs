use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use events::ProgressEvent;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SessionStore;
use crate::error::{DbError, Result};
use crate::models::{NewSession, SessionRecord};

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &NewSession) -> Result<SessionRecord> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(DbError::DuplicateSession(session.id));
        }
        let record = session.clone().into_record(Utc::now());
        sessions.insert(session.id, record.clone());
        Ok(record)
    }

    async fn append_event(&self, id: Uuid, event: &ProgressEvent) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(&id).ok_or(DbError::SessionNotFound(id))?;
        record.events.push(event.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_provider_session(&self, id: Uuid, provider_session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(&id).ok_or(DbError::SessionNotFound(id))?;
        record.provider_session_id = Some(provider_session_id.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn events_after(&self, id: Uuid, after: Option<u64>) -> Result<Vec<ProgressEvent>> {
        let sessions = self.sessions.read().await;
        let record = sessions.get(&id).ok_or(DbError::SessionNotFound(id))?;
        Ok(record
            .events
            .iter()
            .filter(|e| after.map_or(true, |after| e.sequence > after))
            .cloned()
            .collect())
    }
}
