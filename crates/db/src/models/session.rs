use chrono::{DateTime, TimeZone, Utc};
use events::ProgressEvent;
use jobrelay_core::Provider;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Durable projection of one job: metadata plus its ordered event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_branch: Option<String>,
    pub events: Vec<ProgressEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for a session that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: Uuid,
    pub provider: Provider,
    pub repository_url: Option<String>,
    pub repository_branch: Option<String>,
}

impl NewSession {
    pub fn new(id: Uuid, provider: Provider) -> Self {
        Self {
            id,
            provider,
            repository_url: None,
            repository_branch: None,
        }
    }

    pub fn with_repository(mut self, url: impl Into<String>, branch: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self.repository_branch = Some(branch.into());
        self
    }

    pub fn into_record(self, now: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: self.id,
            provider: self.provider,
            provider_session_id: None,
            repository_url: self.repository_url,
            repository_branch: self.repository_branch,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub provider: String,
    pub provider_session_id: Option<String>,
    pub repository_url: Option<String>,
    pub repository_branch: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRow {
    pub fn into_domain(self, events: Vec<ProgressEvent>) -> SessionRecord {
        SessionRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            provider: Provider::parse(&self.provider).unwrap_or(Provider::Claude),
            provider_session_id: self.provider_session_id,
            repository_url: self.repository_url,
            repository_branch: self.repository_branch,
            events,
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionEventRow {
    pub sequence: i64,
    pub data: String,
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
