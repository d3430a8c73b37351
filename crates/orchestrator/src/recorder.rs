//! Session recorder: persists every event a job emits.

use std::sync::Arc;

use async_trait::async_trait;
use db::{DbError, NewSession, SessionStore};
use events::{EventSink, ProgressEvent, SinkError};
use tokio::sync::Mutex;
use tracing::debug;

/// [`EventSink`] that creates the session record on the first event and
/// appends every event after it.
pub struct RecordingSink {
    store: Arc<dyn SessionStore>,
    session: NewSession,
    created: Mutex<bool>,
}

impl RecordingSink {
    pub fn new(store: Arc<dyn SessionStore>, session: NewSession) -> Self {
        Self {
            store,
            session,
            created: Mutex::new(false),
        }
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        let mut created = self.created.lock().await;
        if !*created {
            match self.store.create(&self.session).await {
                Ok(_) => debug!(session_id = %self.session.id, "Session record created"),
                Err(DbError::DuplicateSession(_)) => {}
                Err(e) => return Err(SinkError(e.to_string())),
            }
            *created = true;
        }

        self.store
            .append_event(self.session.id, event)
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
