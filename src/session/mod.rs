//! Session Store: lookup, create, list and retire sessions; thread-safe for
//! concurrent readers and one creator/retirer.

pub mod state_machine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, Subscriber};
use crate::config::EngineConfig;
use crate::error::ApiError;
use crate::event::{Event, SessionStatus};
use crate::persistence::{ListFilter, PersistedRecord, SessionPersistenceAdapter, SessionSummary};
use state_machine::{RunContext, SessionMachineState, WorkerTrigger};

/// Mutable, lock-guarded session state. All of: appending to `history`,
/// mutating `status`, and snapshotting subscribers happen while this lock is
/// held; the lock is never held across a subscriber enqueue, an agent SDK
/// call, or an HTTP write.
pub struct SessionInner {
    pub status: SessionStatus,
    pub machine_state: SessionMachineState,
    pub history: Vec<Event>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the engine knows about one investigation. Immutable fields
/// live directly on the handle; mutable fields live behind `inner`'s lock.
pub struct SessionHandle {
    pub id: String,
    pub alert_text: String,
    pub scenario: String,
    pub orchestrator_agent_id: String,
    pub sub_agent_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub inner: Mutex<SessionInner>,
    pub broadcaster: Broadcaster,
    /// Set by the worker once it starts, so external callers (the cancel
    /// HTTP handler) can feed a trigger into its running select loop
    /// without a direct reference to the task itself.
    trigger_tx: Mutex<Option<mpsc::Sender<WorkerTrigger>>>,
    worker_started: AtomicBool,
}

impl SessionHandle {
    fn new(
        id: String,
        alert_text: String,
        scenario: String,
        orchestrator_agent_id: String,
        sub_agent_ids: Vec<String>,
        queue_cap: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            alert_text,
            scenario,
            orchestrator_agent_id,
            sub_agent_ids,
            created_at: now,
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Pending,
                machine_state: SessionMachineState::Pending,
                history: Vec::new(),
                updated_at: now,
            }),
            broadcaster: Broadcaster::new(queue_cap),
            trigger_tx: Mutex::new(None),
            worker_started: AtomicBool::new(false),
        }
    }

    /// Records the channel the worker is listening on. Called once, right
    /// before the worker's select loop starts.
    pub async fn register_trigger_sender(&self, tx: mpsc::Sender<WorkerTrigger>) {
        *self.trigger_tx.lock().await = Some(tx);
    }

    /// Requests cancellation of a running session. A no-op, not an error,
    /// if the worker has not started yet or has already exited — the
    /// caller only learns the session's eventual terminal status.
    pub async fn request_cancel(&self) {
        if let Some(tx) = self.trigger_tx.lock().await.as_ref() {
            let _ = tx.send(WorkerTrigger::UserCancel).await;
        }
    }

    pub fn run_context(&self, config: &EngineConfig) -> RunContext {
        RunContext::new(self.orchestrator_agent_id.clone(), self.alert_text.clone())
            .with_sub_agents(self.sub_agent_ids.clone())
            .with_max_retries(config.max_retries)
            .with_truncate_limits(config.query_truncate_chars, config.response_truncate_chars)
    }

    /// Append an event to history and fan it out to current subscribers.
    /// Matches the store-lock/session-lock ordering in the design: the
    /// session lock is acquired here, never the store's index lock.
    pub async fn append(&self, event: Event) {
        let event = Arc::new(event);
        {
            let mut inner = self.inner.lock().await;
            inner.history.push((*event).clone());
            inner.updated_at = Utc::now();
        }
        self.broadcaster.publish(event);
    }

    pub async fn set_status(&self, status: SessionStatus) {
        let mut inner = self.inner.lock().await;
        inner.status = status;
    }

    /// Registers a subscriber, synchronously replaying history `> from_seq`
    /// before returning it so the gateway can start tailing live events with
    /// no gap and no duplicate.
    pub async fn subscribe(&self, from_seq: u64) -> (Vec<Event>, Subscriber) {
        let inner = self.inner.lock().await;
        let replay: Vec<Event> = inner
            .history
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect();
        let sub = self.broadcaster.subscribe();
        (replay, sub)
    }

    pub async fn last_seq(&self) -> u64 {
        self.inner.lock().await.history.last().map_or(0, |e| e.seq)
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.lock().await.status
    }

    pub fn should_start_worker(&self) -> bool {
        self.worker_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub async fn to_persisted_record(&self) -> PersistedRecord {
        let inner = self.inner.lock().await;
        let final_message = inner.history.iter().rev().find_map(|e| match &e.kind {
            crate::event::EventKind::Message { text } => Some(text.clone()),
            _ => None,
        });
        PersistedRecord {
            id: self.id.clone(),
            alert_text: self.alert_text.clone(),
            scenario: self.scenario.clone(),
            status: inner.status,
            created_at: self.created_at,
            updated_at: inner.updated_at,
            history: inner.history.clone(),
            final_message,
        }
    }
}

/// Thread-safe index of live sessions plus the durable adapter used for
/// `list`/`retire`. `list` merges the live index with persisted summaries so
/// terminal sessions retired from memory are still discoverable.
pub struct SessionStore {
    live: RwLock<std::collections::HashMap<String, Arc<SessionHandle>>>,
    persistence: Arc<dyn SessionPersistenceAdapter>,
    config: EngineConfig,
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SessionPersistenceAdapter>, config: EngineConfig) -> Self {
        Self {
            live: RwLock::new(std::collections::HashMap::new()),
            persistence,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn persistence(&self) -> &Arc<dyn SessionPersistenceAdapter> {
        &self.persistence
    }

    pub async fn create(
        &self,
        alert_text: String,
        scenario: String,
        orchestrator_agent_id: String,
        sub_agent_ids: Vec<String>,
    ) -> Result<Arc<SessionHandle>, ApiError> {
        if alert_text.trim().is_empty() {
            return Err(ApiError::Validation("alert must not be empty".into()));
        }
        if scenario.trim().is_empty() {
            return Err(ApiError::Validation("scenario must not be empty".into()));
        }

        let mut live = self.live.write().await;
        if live.len() >= self.config.max_live_sessions {
            return Err(ApiError::ResourceExhausted);
        }

        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(
            id.clone(),
            alert_text,
            scenario,
            orchestrator_agent_id,
            sub_agent_ids,
            self.config.subscriber_queue_cap,
        ));
        live.insert(id, handle.clone());
        Ok(handle)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.live.read().await.get(session_id).cloned()
    }

    pub async fn list(
        &self,
        scenario: Option<String>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionSummary>, ApiError> {
        let live_summaries: Vec<SessionSummary> = {
            let live = self.live.read().await;
            let mut items = Vec::new();
            for handle in live.values() {
                if scenario
                    .as_ref()
                    .is_some_and(|s| *s != handle.scenario)
                {
                    continue;
                }
                let status = handle.status().await;
                items.push(SessionSummary {
                    id: handle.id.clone(),
                    scenario: handle.scenario.clone(),
                    status,
                    created_at: handle.created_at,
                    updated_at: handle.inner.lock().await.updated_at,
                });
            }
            items
        };

        let persisted = self
            .persistence
            .list(ListFilter {
                scenario,
                limit: limit.max(live_summaries.len()) + offset,
                offset: 0,
            })
            .await
            .map_err(ApiError::from)?;

        let mut merged = live_summaries;
        let live_ids: std::collections::HashSet<&str> =
            merged.iter().map(|s| s.id.as_str()).collect();
        for summary in persisted {
            if !live_ids.contains(summary.id.as_str()) {
                merged.push(summary);
            }
        }
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(merged.into_iter().skip(offset).take(limit).collect())
    }

    /// Flushes the record to the persistence adapter, then removes it from
    /// the live index. Idempotent: retiring an id not in the live index is a
    /// no-op.
    pub async fn retire(&self, session_id: &str) -> Result<(), ApiError> {
        let handle = {
            let mut live = self.live.write().await;
            live.remove(session_id)
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        let status = handle.status().await;
        let should_persist = status != SessionStatus::Cancelled || self.config.persist_cancelled;
        if should_persist {
            let record = handle.to_persisted_record().await;
            self.persistence
                .save(record)
                .await
                .map_err(ApiError::from)?;
        }
        handle.broadcaster.close_all();
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), ApiError> {
        if let Some(handle) = self.get(session_id).await {
            if !handle.status().await.is_terminal() {
                return Err(ApiError::Conflict(
                    "cannot delete a non-terminal session".into(),
                ));
            }
            self.retire(session_id).await?;
        } else {
            // Not live: confirm it exists in durable storage so an unknown
            // id still yields `not_found` rather than a silent no-op.
            self.persistence.load(session_id).await.map_err(ApiError::from)?;
        }
        self.persistence
            .delete(session_id)
            .await
            .map_err(ApiError::from)
    }
}
