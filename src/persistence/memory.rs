use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ListFilter, PersistedRecord, PersistenceError, SessionPersistenceAdapter, SessionSummary};

/// `Mutex<HashMap<_>>`-backed adapter, used by default in tests and
/// available in production for single-process deployments that accept
/// losing history on restart.
#[derive(Default)]
pub struct InMemoryPersistenceAdapter {
    records: Mutex<HashMap<String, PersistedRecord>>,
}

impl InMemoryPersistenceAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionPersistenceAdapter for InMemoryPersistenceAdapter {
    async fn save(&self, record: PersistedRecord) -> Result<(), PersistenceError> {
        self.records.lock().unwrap().insert(record.id.clone(), record);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<PersistedRecord, PersistenceError> {
        self.records
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(session_id.to_string()))
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<SessionSummary>, PersistenceError> {
        let records = self.records.lock().unwrap();
        let mut items: Vec<&PersistedRecord> = records
            .values()
            .filter(|r| {
                filter
                    .scenario
                    .as_ref()
                    .map(|s| s == &r.scenario)
                    .unwrap_or(true)
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        Ok(items
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(SessionSummary::from)
            .collect())
    }

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        self.records.lock().unwrap().remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SessionStatus;
    use chrono::Utc;

    fn record(id: &str, scenario: &str) -> PersistedRecord {
        PersistedRecord {
            id: id.to_string(),
            alert_text: "alert".to_string(),
            scenario: scenario.to_string(),
            status: SessionStatus::Completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            history: vec![],
            final_message: Some("diagnosis".to_string()),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryPersistenceAdapter::new();
        store.save(record("s1", "telco")).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded.scenario, "telco");
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = InMemoryPersistenceAdapter::new();
        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_scenario() {
        let store = InMemoryPersistenceAdapter::new();
        store.save(record("s1", "telco")).await.unwrap();
        store.save(record("s2", "cloud")).await.unwrap();
        let items = store
            .list(ListFilter {
                scenario: Some("telco".to_string()),
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "s1");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryPersistenceAdapter::new();
        store.save(record("s1", "telco")).await.unwrap();
        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.is_err());
    }
}
