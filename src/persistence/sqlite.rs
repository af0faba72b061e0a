use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{ListFilter, PersistedRecord, PersistenceError, SessionPersistenceAdapter, SessionSummary};
use crate::event::SessionStatus;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    alert_text TEXT NOT NULL,
    scenario TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    history TEXT NOT NULL,
    final_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_scenario ON sessions(scenario);
CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at DESC);
"#;

/// `rusqlite`-backed persistence adapter; the default for production
/// deployments. A single connection guarded by a mutex, exactly as the
/// production `Database` type wraps its `rusqlite::Connection` — SQLite
/// itself serializes writers, so there is no benefit to a pool here.
#[derive(Clone)]
pub struct SqlitePersistenceAdapter {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistenceAdapter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn status_str(status: SessionStatus) -> &'static str {
        match status {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::AwaitingInput => "awaiting_input",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    fn parse_status(s: &str) -> SessionStatus {
        match s {
            "running" => SessionStatus::Running,
            "awaiting_input" => SessionStatus::AwaitingInput,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Pending,
        }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PersistedRecord> {
        let history_json: String = row.get("history")?;
        let status_str: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(PersistedRecord {
            id: row.get("id")?,
            alert_text: row.get("alert_text")?,
            scenario: row.get("scenario")?,
            status: Self::parse_status(&status_str),
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
            history: serde_json::from_str(&history_json).unwrap_or_default(),
            final_message: row.get("final_message")?,
        })
    }
}

#[async_trait]
impl SessionPersistenceAdapter for SqlitePersistenceAdapter {
    async fn save(&self, record: PersistedRecord) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let history_json = serde_json::to_string(&record.history)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        conn.execute(
            "INSERT INTO sessions (id, alert_text, scenario, status, created_at, updated_at, history, final_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                history = excluded.history,
                final_message = excluded.final_message",
            params![
                record.id,
                record.alert_text,
                record.scenario,
                Self::status_str(record.status),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                history_json,
                record.final_message,
            ],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<PersistedRecord, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, alert_text, scenario, status, created_at, updated_at, history, final_message
             FROM sessions WHERE id = ?1",
            params![session_id],
            Self::row_to_record,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                PersistenceError::NotFound(session_id.to_string())
            }
            other => PersistenceError::Backend(other.to_string()),
        })
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<SessionSummary>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let limit = if filter.limit == 0 { 50 } else { filter.limit } as i64;
        let offset = filter.offset as i64;

        let mut stmt = if filter.scenario.is_some() {
            conn.prepare(
                "SELECT id, scenario, status, created_at, updated_at FROM sessions
                 WHERE scenario = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            )
        } else {
            conn.prepare(
                "SELECT id, scenario, status, created_at, updated_at FROM sessions
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )
        }
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<SessionSummary> {
            let status_str: String = row.get("status")?;
            let created_at: String = row.get("created_at")?;
            let updated_at: String = row.get("updated_at")?;
            Ok(SessionSummary {
                id: row.get("id")?,
                scenario: row.get("scenario")?,
                status: Self::parse_status(&status_str),
                created_at: parse_datetime(&created_at),
                updated_at: parse_datetime(&updated_at),
            })
        };

        let rows = if let Some(scenario) = &filter.scenario {
            stmt.query_map(params![scenario, limit, offset], map_row)
        } else {
            stmt.query_map(params![limit, offset], map_row)
        }
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str) -> PersistedRecord {
        PersistedRecord {
            id: id.to_string(),
            alert_text: "link down".to_string(),
            scenario: "telco".to_string(),
            status: SessionStatus::Completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            history: vec![],
            final_message: Some("diagnosis".to_string()),
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let adapter = SqlitePersistenceAdapter::open_in_memory().unwrap();
        adapter.save(record("s1")).await.unwrap();
        let loaded = adapter.load("s1").await.unwrap();
        assert_eq!(loaded.alert_text, "link down");
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing() {
        let adapter = SqlitePersistenceAdapter::open_in_memory().unwrap();
        adapter.save(record("s1")).await.unwrap();
        let mut updated = record("s1");
        updated.status = SessionStatus::Failed;
        adapter.save(updated).await.unwrap();
        let loaded = adapter.load("s1").await.unwrap();
        assert_eq!(loaded.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let adapter = SqlitePersistenceAdapter::open_in_memory().unwrap();
        assert!(matches!(
            adapter.load("nope").await.unwrap_err(),
            PersistenceError::NotFound(_)
        ));
    }
}
