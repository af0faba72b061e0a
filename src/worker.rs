//! One background task per active session, driving the agent SDK from
//! `pending` to a terminal state and feeding every callback through the
//! pure state machine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentClient, AgentError, AgentErrorKind, SdkEvent};
use crate::event::Event;
use crate::session::state_machine::{transition, Effect, RunContext, SessionMachineState, WorkerTrigger};
use crate::session::{SessionHandle, SessionStore};
use crate::translator::Translator;

/// Drives a single session's run to completion. Launched once, lazily, on
/// the first subscriber or an explicit `start` call. The internal trigger
/// channel carries both externally-originated triggers (`UserCancel`, sent
/// by the cancel HTTP handler through `SessionHandle::request_cancel`) and
/// the worker's own retry/timeout timers, which loop back through the same
/// channel.
pub async fn run(session: Arc<SessionHandle>, store: Arc<SessionStore>, agent_client: Arc<dyn AgentClient>) {
    let (trigger_tx, mut trigger_rx) = mpsc::channel(32);
    session.register_trigger_sender(trigger_tx.clone()).await;

    let config = store.config().clone();

    let timeout_tx = trigger_tx.clone();
    let timeout_handle = tokio::spawn(async move {
        tokio::time::sleep(config.run_timeout).await;
        let _ = timeout_tx.send(WorkerTrigger::RunTimeout).await;
    });

    let _ = trigger_tx.send(WorkerTrigger::Start).await;

    let ctx = session.run_context(&config);
    let mut machine_state = SessionMachineState::Pending;
    let mut current_run_rx: Option<mpsc::Receiver<SdkEvent>> = None;
    let mut current_cancel: Option<CancellationToken> = None;
    let mut translator = Translator::new();

    loop {
        let trigger = tokio::select! {
            biased;
            sdk_result = recv_optional(&mut current_run_rx), if current_run_rx.is_some() => {
                match sdk_result {
                    Some(sdk_event) => {
                        // A run's channel is done once it reports its own
                        // end; drop it immediately rather than waiting for
                        // the sender to close naturally, so a subsequent
                        // retry's fresh channel can't race a stale close
                        // against the still-running `RetryTimeout` timer.
                        if matches!(sdk_event, SdkEvent::RunEnded { .. } | SdkEvent::Error(_)) {
                            current_run_rx = None;
                        }
                        translator.translate(sdk_event)
                    }
                    None => {
                        // The SDK closed its event channel without an explicit
                        // RunEnded/Error callback — most commonly because the
                        // in-flight call was cancelled. Feed a synthetic error
                        // so a pending `Cancelling` state can finalize (any
                        // trigger besides UserCancel/RunTimeout resolves it to
                        // Cancelled) and a mid-run closure without cancellation
                        // fails the session instead of stalling it forever.
                        current_run_rx = None;
                        WorkerTrigger::SdkError(AgentError {
                            kind: AgentErrorKind::Unknown,
                            message: "agent run ended without a terminal event".to_string(),
                        })
                    }
                }
            }
            Some(t) = trigger_rx.recv() => t,
            else => break,
        };

        let mut pending = vec![trigger];
        while let Some(trigger) = pending.pop() {
            match transition(&machine_state, &ctx, trigger) {
                Ok((new_state, effects)) => {
                    machine_state = new_state;
                    session.set_status(machine_state.to_session_status()).await;

                    for effect in effects {
                        if let Some(follow_up) = execute_effect(
                            effect,
                            &session,
                            &store,
                            &agent_client,
                            &ctx,
                            &mut current_run_rx,
                            &mut current_cancel,
                            &mut translator,
                            &trigger_tx,
                        )
                        .await
                        {
                            pending.push(follow_up);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(session_id = %session.id, error = %err, "ignoring invalid trigger");
                }
            }
        }

        if machine_state.is_terminal() {
            break;
        }
    }

    timeout_handle.abort();
    let _ = store.retire(&session.id).await;
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<SdkEvent>>) -> Option<SdkEvent> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_effect(
    effect: Effect,
    session: &Arc<SessionHandle>,
    store: &Arc<SessionStore>,
    agent_client: &Arc<dyn AgentClient>,
    ctx: &RunContext,
    current_run_rx: &mut Option<mpsc::Receiver<SdkEvent>>,
    current_cancel: &mut Option<CancellationToken>,
    translator: &mut Translator,
    trigger_tx: &mpsc::Sender<WorkerTrigger>,
) -> Option<WorkerTrigger> {
    match effect {
        Effect::AppendEvent(kind) => {
            let seq = session.last_seq().await + 1;
            let ts = utc_now_millis();
            session.append(Event::new(seq, ts, kind)).await;
            None
        }
        Effect::RequestAgentRun { thread_id } => {
            translator.note_run_start();
            match agent_client
                .start_run(
                    thread_id,
                    &ctx.orchestrator_agent_id,
                    &ctx.sub_agent_ids,
                    &ctx.alert_text,
                )
                .await
            {
                Ok(handle) => {
                    *current_run_rx = Some(handle.events);
                    *current_cancel = Some(handle.cancel);
                    None
                }
                Err(err) => Some(WorkerTrigger::SdkError(err)),
            }
        }
        Effect::RequestCancel => {
            if let Some(cancel) = current_cancel.as_ref() {
                cancel.cancel();
            }
            None
        }
        Effect::ScheduleRetry { delay, attempt } => {
            let tx = trigger_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(WorkerTrigger::RetryTimeout { attempt }).await;
            });
            None
        }
        Effect::PersistTerminal => {
            let record = session.to_persisted_record().await;
            if let Err(err) = store.persistence().save(record).await {
                tracing::error!(session_id = %session.id, error = %err, "failed to persist terminal session");
            }
            None
        }
    }
}

fn utc_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::{AgentError, DelayedMockAgentClient, MockAgentClient, ScriptedRun, SdkEvent};
    use crate::config::EngineConfig;
    use crate::event::{EventKind, SessionStatus};
    use crate::persistence::SqlitePersistenceAdapter;

    fn test_store(config: EngineConfig) -> Arc<SessionStore> {
        let persistence = Arc::new(SqlitePersistenceAdapter::open_in_memory().unwrap());
        Arc::new(SessionStore::new(persistence, config))
    }

    /// Polls a subscriber until `predicate` holds for the accumulated events,
    /// or the deadline passes, mirroring the teacher's `wait_for_*` helpers.
    async fn collect_until(
        subscriber: &mut crate::broadcaster::Subscriber,
        timeout: Duration,
        mut predicate: impl FnMut(&[Event]) -> bool,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if predicate(&events) {
                break;
            }
            match tokio::time::timeout(Duration::from_millis(50), subscriber.recv()).await {
                Ok(Some(event)) => events.push((*event).clone()),
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        events
    }

    /// S1: single-subscriber happy path — a full run with one step produces
    /// a time-ordered stream ending in `run_complete`, and the session
    /// retires into `Completed`.
    #[tokio::test]
    async fn s1_single_subscriber_happy_path() {
        let store = test_store(EngineConfig::default());
        let agent_client = Arc::new(MockAgentClient::new());
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::ThreadCreated { thread_id: "t1".into() },
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::StepComplete {
                    agent: "topology".into(),
                    raw_arguments: "which link carries VPN-A?".into(),
                    response: "link 7".into(),
                },
                SdkEvent::RunEnded {
                    final_message: "VPN-A is down because link 7 flapped".into(),
                    tokens: Some(512),
                },
            ],
        });

        let session = store
            .create("link down".into(), "default".into(), "orchestrator-1".into(), vec!["topology".into()])
            .await
            .unwrap();
        let (replay, mut subscriber) = session.subscribe(0).await;
        assert!(replay.is_empty());

        tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        let events = collect_until(&mut subscriber, Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e.kind, EventKind::RunComplete { .. }))
        })
        .await;

        let labels: Vec<&str> = events.iter().map(|e| e.kind.label()).collect();
        assert_eq!(
            labels,
            vec!["run_start", "thread_created", "step_start", "step_complete", "message", "run_complete"]
        );
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }

        assert!(store.get(&session.id).await.is_none(), "session should have retired");
    }

    /// S2: reconnect mid-flight — a subscriber that joins after some history
    /// has already accumulated gets exactly that history as replay, then
    /// tails the rest live with no gap or duplicate.
    #[tokio::test]
    async fn s2_reconnect_mid_flight_replays_then_tails_live() {
        let store = test_store(EngineConfig::default());
        let agent_client = Arc::new(MockAgentClient::new());
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::ThreadCreated { thread_id: "t1".into() },
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::StepComplete {
                    agent: "topology".into(),
                    raw_arguments: "q".into(),
                    response: "r".into(),
                },
                SdkEvent::RunEnded {
                    final_message: "diagnosis".into(),
                    tokens: None,
                },
            ],
        });

        let session = store
            .create("link down".into(), "default".into(), "orchestrator-1".into(), vec![])
            .await
            .unwrap();
        tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        // Let the run progress partway before the first client connects.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let first_seq = session.last_seq().await;

        let (replay, mut subscriber) = session.subscribe(first_seq).await;
        assert!(replay.iter().all(|e| e.seq > first_seq), "replay must not repeat already-seen events");

        let live = collect_until(&mut subscriber, Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e.kind, EventKind::RunComplete { .. }))
        })
        .await;

        let mut all: Vec<Event> = replay;
        all.extend(live);
        for pair in all.windows(2) {
            assert_eq!(pair[1].seq, pair[0].seq + 1, "no gap or duplicate across reconnect");
        }
        assert!(all.iter().any(|e| matches!(e.kind, EventKind::RunComplete { .. })));
    }

    /// S3: a subscriber too slow to drain its queue is evicted rather than
    /// allowed to block the worker, and sees `DroppedForSlowness`.
    #[tokio::test]
    async fn s3_slow_subscriber_is_evicted_not_blocking() {
        let mut config = EngineConfig::default();
        config.subscriber_queue_cap = 1;
        let store = test_store(config);

        let agent_client = Arc::new(MockAgentClient::new());
        let mut events = vec![SdkEvent::ThreadCreated { thread_id: "t1".into() }];
        for i in 0..10 {
            events.push(SdkEvent::StepStart { agent: format!("agent-{i}") });
            events.push(SdkEvent::StepComplete {
                agent: format!("agent-{i}"),
                raw_arguments: "q".into(),
                response: "r".into(),
            });
        }
        events.push(SdkEvent::RunEnded { final_message: "done".into(), tokens: None });
        agent_client.queue(ScriptedRun { events });

        let session = store
            .create("flood".into(), "default".into(), "orchestrator-1".into(), vec![])
            .await
            .unwrap();
        let (_, mut subscriber) = session.subscribe(0).await;

        let worker = tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        // Never drain: the worker must not stall waiting on this subscriber.
        let outcome = tokio::time::timeout(Duration::from_secs(2), worker).await;
        assert!(outcome.is_ok(), "worker must finish even with a non-draining subscriber");

        let mut saw_eviction = false;
        while let Some(event) = subscriber.recv().await {
            let _ = event;
        }
        if subscriber.close_reason() == crate::broadcaster::CloseReason::DroppedForSlowness {
            saw_eviction = true;
        }
        assert!(saw_eviction, "slow subscriber should be evicted, not starve the worker");
    }

    /// S4: a retryable SDK error resets the step counter and schedules a
    /// retry; the retried run's `step_start` begins at 1 again.
    #[tokio::test]
    async fn s4_retry_clears_in_progress_steps() {
        let mut config = EngineConfig::default();
        config.max_retries = 2;
        let store = test_store(config);

        let agent_client = Arc::new(MockAgentClient::new());
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::ThreadCreated { thread_id: "t1".into() },
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::Error(AgentError::network("connection reset")),
            ],
        });
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::StepComplete {
                    agent: "topology".into(),
                    raw_arguments: "q".into(),
                    response: "r".into(),
                },
                SdkEvent::RunEnded { final_message: "recovered".into(), tokens: None },
            ],
        });

        let session = store
            .create("flaky link".into(), "default".into(), "orchestrator-1".into(), vec![])
            .await
            .unwrap();
        let (_, mut subscriber) = session.subscribe(0).await;

        tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        let events = collect_until(&mut subscriber, Duration::from_secs(5), |events| {
            events.iter().any(|e| matches!(e.kind, EventKind::RunComplete { .. }))
        })
        .await;

        let retry = events.iter().find(|e| matches!(e.kind, EventKind::Retry { .. }));
        assert!(retry.is_some(), "should have emitted a retry event");

        let step_starts: Vec<u32> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::StepStart { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(step_starts, vec![1, 1], "step counter resets to 1 after a retry");
    }

    /// S5: an orchestrator thinking block embedded in the tool-call
    /// arguments is split into `query`/`reasoning` on the wire event, not
    /// left folded into one field.
    #[tokio::test]
    async fn s5_reasoning_block_is_extracted_onto_the_event() {
        let store = test_store(EngineConfig::default());
        let agent_client = Arc::new(MockAgentClient::new());
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::ThreadCreated { thread_id: "t1".into() },
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::StepComplete {
                    agent: "topology".into(),
                    raw_arguments: "[ORCHESTRATOR_THINKING]\ncheck redundant paths\n[/ORCHESTRATOR_THINKING]\nWhich links carry VPN-A?".into(),
                    response: "link 7".into(),
                },
                SdkEvent::RunEnded { final_message: "diagnosis".into(), tokens: None },
            ],
        });

        let session = store
            .create("link down".into(), "default".into(), "orchestrator-1".into(), vec![])
            .await
            .unwrap();
        let (_, mut subscriber) = session.subscribe(0).await;

        tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        let events = collect_until(&mut subscriber, Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e.kind, EventKind::RunComplete { .. }))
        })
        .await;

        let step_complete = events
            .iter()
            .find_map(|e| match &e.kind {
                EventKind::StepComplete { query, reasoning, .. } => Some((query.clone(), reasoning.clone())),
                _ => None,
            })
            .expect("should have a step_complete event");
        assert_eq!(step_complete.0, "Which links carry VPN-A?");
        assert_eq!(step_complete.1, "check redundant paths");
    }

    /// S6: cancelling a running session through `request_cancel` reaches
    /// `Cancelled` promptly, without waiting for the in-flight SDK call's
    /// own delay to elapse.
    #[tokio::test]
    async fn s6_cancellation_is_prompt() {
        let store = test_store(EngineConfig::default());
        let agent_client = Arc::new(DelayedMockAgentClient::new(Duration::from_secs(5)));
        agent_client.queue(ScriptedRun {
            events: vec![
                SdkEvent::ThreadCreated { thread_id: "t1".into() },
                SdkEvent::StepStart { agent: "topology".into() },
                SdkEvent::StepComplete {
                    agent: "topology".into(),
                    raw_arguments: "q".into(),
                    response: "r".into(),
                },
            ],
        });
        let run_started = agent_client.run_started.clone();

        let session = store
            .create("link down".into(), "default".into(), "orchestrator-1".into(), vec![])
            .await
            .unwrap();
        let (_, mut subscriber) = session.subscribe(0).await;

        tokio::spawn(run(session.clone(), store.clone(), agent_client.clone()));

        tokio::time::timeout(Duration::from_secs(1), run_started.notified())
            .await
            .expect("run should start");

        let start = tokio::time::Instant::now();
        session.request_cancel().await;

        let events = collect_until(&mut subscriber, Duration::from_secs(2), |events| {
            events.iter().any(|e| matches!(e.kind, EventKind::Error { .. }))
        })
        .await;

        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_secs(2), "cancellation took {elapsed:?}");
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::Error { recoverable: false, .. })));

        // Retired from the live index, persisted as cancelled.
        assert!(store.get(&session.id).await.is_none());
        let record = store.persistence().load(&session.id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Cancelled);
    }
}
