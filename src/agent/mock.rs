//! Deterministic agent SDK test doubles, in the style of the production
//! code's mock LLM/tool adapters: a queue of scripted outcomes, recorded
//! calls, and an optional artificial delay for exercising cancellation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::{AgentClient, AgentError, RunHandle, SdkEvent};

/// One scripted run: the sequence of `SdkEvent`s to emit, in order, before
/// the channel closes. A script emitting no `RunEnded`/`Error` leaves the
/// worker waiting, which is useful for cancellation tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub events: Vec<SdkEvent>,
}

/// Records every `start_run` call and replays one scripted run per call,
/// looping the last script if more calls arrive than scripts were queued
/// (so a retry path can reuse the same terminal script).
pub struct MockAgentClient {
    scripts: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<(Option<String>, String, Vec<String>, String)>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, run: ScriptedRun) {
        self.scripts.lock().unwrap().push_back(run);
    }

    pub fn recorded_calls(&self) -> Vec<(Option<String>, String, Vec<String>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn start_run(
        &self,
        thread_id: Option<String>,
        orchestrator_agent_id: &str,
        sub_agent_ids: &[String],
        alert_text: &str,
    ) -> Result<RunHandle, AgentError> {
        self.calls.lock().unwrap().push((
            thread_id,
            orchestrator_agent_id.to_string(),
            sub_agent_ids.to_vec(),
            alert_text.to_string(),
        ));

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.pop_front().unwrap_or_default()
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for event in script.events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(RunHandle {
            events: rx,
            cancel: CancellationToken::new(),
        })
    }
}

/// Wraps `MockAgentClient` with a fixed per-event delay, racing each send
/// against the handle's own cancellation token so cancellation tests can
/// assert the worker reacts promptly instead of waiting out the delay.
pub struct DelayedMockAgentClient {
    inner: MockAgentClient,
    delay: Duration,
    pub run_started: Arc<Notify>,
}

impl DelayedMockAgentClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockAgentClient::new(),
            delay,
            run_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self, run: ScriptedRun) {
        self.inner.queue(run);
    }
}

#[async_trait]
impl AgentClient for DelayedMockAgentClient {
    async fn start_run(
        &self,
        thread_id: Option<String>,
        orchestrator_agent_id: &str,
        sub_agent_ids: &[String],
        alert_text: &str,
    ) -> Result<RunHandle, AgentError> {
        let handle = self
            .inner
            .start_run(thread_id, orchestrator_agent_id, sub_agent_ids, alert_text)
            .await?;
        self.run_started.notify_waiters();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(64);
        let mut upstream = handle.events;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    maybe_event = upstream.recv() => {
                        match maybe_event {
                            Some(event) => {
                                tokio::select! {
                                    () = tokio::time::sleep(delay) => {}
                                    () = task_cancel.cancelled() => break,
                                }
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(RunHandle { events: rx, cancel })
    }
}
