//! Durable storage for terminal session records.
//!
//! The engine does not care which concrete store backs this trait; an
//! in-memory map and a SQLite-backed adapter are both provided, matching the
//! production code's pattern of a thin trait seam over a `rusqlite`-backed
//! default implementation.

mod memory;
mod sqlite;

pub use memory::InMemoryPersistenceAdapter;
pub use sqlite::SqlitePersistenceAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Event, SessionStatus};

/// The persisted shape of a session, matching the wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: String,
    pub alert_text: String,
    pub scenario: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<Event>,
    pub final_message: Option<String>,
}

/// Lightweight projection of a record, returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub scenario: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PersistedRecord> for SessionSummary {
    fn from(r: &PersistedRecord) -> Self {
        Self {
            id: r.id.clone(),
            scenario: r.scenario.clone(),
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub scenario: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence backend error: {0}")]
    Backend(String),
    #[error("session not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait SessionPersistenceAdapter: Send + Sync {
    /// Idempotent upsert of a completed, failed or cancelled session.
    async fn save(&self, record: PersistedRecord) -> Result<(), PersistenceError>;

    /// Returns a record in terminal status; callers never resume a worker
    /// from a persisted record.
    async fn load(&self, session_id: &str) -> Result<PersistedRecord, PersistenceError>;

    async fn list(&self, filter: ListFilter) -> Result<Vec<SessionSummary>, PersistenceError>;

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<T: SessionPersistenceAdapter + ?Sized> SessionPersistenceAdapter for std::sync::Arc<T> {
    async fn save(&self, record: PersistedRecord) -> Result<(), PersistenceError> {
        (**self).save(record).await
    }

    async fn load(&self, session_id: &str) -> Result<PersistedRecord, PersistenceError> {
        (**self).load(session_id).await
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<SessionSummary>, PersistenceError> {
        (**self).list(filter).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        (**self).delete(session_id).await
    }
}
