//! Classifies raw `SdkEvent`s into `WorkerTrigger`s for the state machine.
//!
//! Kept separate from the worker's executor loop so the mapping from "what
//! the SDK said" to "what the state machine should see" is a single,
//! independently testable function — in the same spirit as the production
//! code's event-handler callbacks, just without the I/O.

use std::time::Instant;

use crate::agent::SdkEvent;
use crate::session::state_machine::WorkerTrigger;

/// Tracks wall-clock timing the pure state machine cannot observe itself:
/// when the current step started, so `StepComplete` can report a duration.
#[derive(Default)]
pub struct Translator {
    step_started_at: Option<Instant>,
    run_started_at: Option<Instant>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_step_start(&mut self) {
        self.step_started_at = Some(Instant::now());
    }

    pub fn note_run_start(&mut self) {
        self.run_started_at = Some(Instant::now());
    }

    /// Maps one SDK callback to the trigger the state machine should see.
    pub fn translate(&mut self, event: SdkEvent) -> WorkerTrigger {
        match event {
            SdkEvent::ThreadCreated { thread_id } => WorkerTrigger::ThreadCreated { thread_id },
            SdkEvent::StepStart { agent } => {
                self.note_step_start();
                WorkerTrigger::StepStart { agent }
            }
            SdkEvent::StepComplete {
                agent,
                raw_arguments,
                response,
            } => {
                let duration_ms = self
                    .step_started_at
                    .take()
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                let is_error = response.starts_with("ERROR:");
                WorkerTrigger::StepComplete {
                    agent,
                    raw_arguments,
                    response,
                    duration_ms,
                    is_error,
                }
            }
            SdkEvent::MessageDelta { text } => WorkerTrigger::MessageDelta { text },
            SdkEvent::MessageCreate { text } => WorkerTrigger::MessageCreate { text },
            SdkEvent::RunEnded {
                final_message,
                tokens,
            } => {
                let duration_ms = self
                    .run_started_at
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                WorkerTrigger::RunEnded {
                    final_message,
                    tokens,
                    duration_ms,
                }
            }
            SdkEvent::Error(err) => WorkerTrigger::SdkError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_complete_reports_elapsed_duration() {
        let mut t = Translator::new();
        t.translate(SdkEvent::StepStart { agent: "topology".into() });
        std::thread::sleep(std::time::Duration::from_millis(5));
        let trigger = t.translate(SdkEvent::StepComplete {
            agent: "topology".into(),
            raw_arguments: "q".into(),
            response: "ok".into(),
        });
        match trigger {
            WorkerTrigger::StepComplete { duration_ms, is_error, .. } => {
                assert!(duration_ms >= 5);
                assert!(!is_error);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn step_complete_without_start_reports_zero_duration() {
        let mut t = Translator::new();
        let trigger = t.translate(SdkEvent::StepComplete {
            agent: "topology".into(),
            raw_arguments: "q".into(),
            response: "ERROR: boom".into(),
        });
        match trigger {
            WorkerTrigger::StepComplete { duration_ms, is_error, .. } => {
                assert_eq!(duration_ms, 0);
                assert!(is_error);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
