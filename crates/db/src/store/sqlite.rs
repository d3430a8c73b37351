use async_trait::async_trait;
use chrono::Utc;
use events::ProgressEvent;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use super::SessionStore;
use crate::error::{DbError, Result};
use crate::models::{datetime_to_millis, NewSession, SessionEventRow, SessionRecord, SessionRow};

#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_events(&self, id: Uuid, after: Option<u64>) -> Result<Vec<ProgressEvent>> {
        let after = after.map(|a| a as i64).unwrap_or(-1);

        let rows: Vec<SessionEventRow> = sqlx::query_as(
            r#"
            SELECT sequence, data
            FROM session_events
            WHERE session_id = ? AND sequence > ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(id.to_string())
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<ProgressEvent>(&row.data) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    session_id = %id,
                    sequence = row.sequence,
                    error = %e,
                    "Skipping unreadable stored event"
                ),
            }
        }
        Ok(events)
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(datetime_to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::SessionNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &NewSession) -> Result<SessionRecord> {
        let record = session.clone().into_record(Utc::now());
        let now = datetime_to_millis(record.created_at);

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (id, provider, provider_session_id, repository_url, repository_branch, created_at, updated_at)
            VALUES (?, ?, NULL, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.provider.as_str())
        .bind(&record.repository_url)
        .bind(&record.repository_branch)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::DuplicateSession(record.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_event(&self, id: Uuid, event: &ProgressEvent) -> Result<()> {
        let data = serde_json::to_string(event)?;

        self.touch(id).await?;

        sqlx::query(
            r#"
            INSERT INTO session_events (session_id, sequence, event_type, data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event.sequence as i64)
        .bind(event.event_type.as_str())
        .bind(&data)
        .bind(datetime_to_millis(event.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_provider_session(&self, id: Uuid, provider_session_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET provider_session_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider_session_id)
        .bind(datetime_to_millis(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::SessionNotFound(id));
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, provider, provider_session_id, repository_url, repository_branch, created_at, updated_at
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let events = self.load_events(id, None).await?;
                Ok(Some(row.into_domain(events)))
            }
            None => Ok(None),
        }
    }

    async fn events_after(&self, id: Uuid, after: Option<u64>) -> Result<Vec<ProgressEvent>> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_none() {
            return Err(DbError::SessionNotFound(id));
        }
        self.load_events(id, after).await
    }
}
