//! The pure heart of the engine: `transition` maps `(state, context, trigger)`
//! to a new state plus a list of effects for the worker's executor to carry
//! out. No I/O happens here — not even a clock read — so every branch is
//! unit-testable without mocking anything.

use thiserror::Error;

use super::effect::{retry_delay, Effect};
use super::event::WorkerTrigger;
use super::state::{RunContext, SessionMachineState};
use crate::event::EventKind;
use crate::sanitize::{extract_reasoning, redact_credentials, strip_reasoning, truncate};

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} in state {1:?}")]
    InvalidTransition(String, String),
    #[error("session already in a terminal state")]
    AlreadyTerminal,
}

pub type TransitionResult = Result<(SessionMachineState, Vec<Effect>), TransitionError>;

pub fn transition(
    state: &SessionMachineState,
    ctx: &RunContext,
    trigger: WorkerTrigger,
) -> TransitionResult {
    use SessionMachineState::*;
    use WorkerTrigger as T;

    if state.is_terminal() {
        return Err(TransitionError::AlreadyTerminal);
    }

    // Cancellation is in progress: the worker proceeds to `Cancelled` as
    // soon as the in-flight SDK callback returns, regardless of what it
    // reported.
    if let Cancelling { .. } = state {
        return match trigger {
            T::UserCancel | T::RunTimeout => Ok((state.clone(), vec![])),
            _ => Ok((
                Cancelled,
                vec![
                    Effect::append(EventKind::Error {
                        message: "cancelled".to_string(),
                        recoverable: false,
                    }),
                    Effect::PersistTerminal,
                ],
            )),
        };
    }

    match (state, trigger) {
        (Pending, T::Start) => Ok((
            InFlight {
                thread_id: None,
                attempt: 1,
                next_step: 1,
                current_step: None,
            },
            vec![
                Effect::append(EventKind::RunStart {
                    alert: ctx.alert_text.clone(),
                    thread_id: None,
                }),
                Effect::RequestAgentRun { thread_id: None },
            ],
        )),

        (Pending, T::UserCancel) => Ok((
            Cancelled,
            vec![
                Effect::append(EventKind::Error {
                    message: "cancelled".to_string(),
                    recoverable: false,
                }),
                Effect::PersistTerminal,
            ],
        )),

        (
            InFlight {
                thread_id,
                attempt,
                next_step,
                current_step,
            },
            T::ThreadCreated { thread_id: new_id },
        ) => {
            let mut effects = vec![];
            if thread_id.is_none() {
                effects.push(Effect::append(EventKind::ThreadCreated {
                    thread_id: new_id.clone(),
                }));
            }
            Ok((
                InFlight {
                    thread_id: Some(new_id),
                    attempt: *attempt,
                    next_step: *next_step,
                    current_step: *current_step,
                },
                effects,
            ))
        }

        (
            InFlight {
                thread_id,
                attempt,
                next_step,
                current_step: _,
            },
            T::StepStart { agent },
        ) => {
            let step = *next_step;
            Ok((
                InFlight {
                    thread_id: thread_id.clone(),
                    attempt: *attempt,
                    next_step: next_step + 1,
                    current_step: Some(step),
                },
                vec![Effect::append(EventKind::StepStart { step, agent })],
            ))
        }

        (
            InFlight {
                thread_id,
                attempt,
                next_step,
                current_step: Some(step),
            },
            T::StepComplete {
                agent,
                raw_arguments,
                response,
                duration_ms,
                is_error,
            },
        ) => {
            let (query, reasoning) = extract_reasoning(&raw_arguments);
            let query = truncate(&query, ctx.query_truncate_chars);
            let response = truncate(&response, ctx.response_truncate_chars);
            Ok((
                InFlight {
                    thread_id: thread_id.clone(),
                    attempt: *attempt,
                    next_step: *next_step,
                    current_step: None,
                },
                vec![Effect::append(EventKind::StepComplete {
                    step: *step,
                    agent,
                    duration_ms,
                    query,
                    reasoning,
                    response,
                    error: is_error,
                })],
            ))
        }

        (InFlight { .. }, T::MessageDelta { text }) => {
            Ok((state.clone(), vec![Effect::append(EventKind::MessageDelta { text })]))
        }

        (InFlight { .. }, T::MessageCreate { text }) => {
            Ok((state.clone(), vec![Effect::append(EventKind::Thinking { text })]))
        }

        (
            InFlight { next_step, .. },
            T::RunEnded {
                final_message,
                tokens,
                duration_ms,
            },
        ) => {
            let message = strip_reasoning(&final_message);
            let steps = next_step.saturating_sub(1);
            Ok((
                Completed {
                    final_message: message.clone(),
                },
                vec![
                    Effect::append(EventKind::Message { text: message }),
                    Effect::append(EventKind::RunComplete {
                        steps,
                        tokens,
                        duration_ms,
                    }),
                    Effect::PersistTerminal,
                ],
            ))
        }

        (InFlight { thread_id, attempt, .. }, T::SdkError(err)) => {
            if err.kind.is_retryable() && *attempt < ctx.max_retries {
                let next_attempt = attempt + 1;
                Ok((
                    InFlight {
                        thread_id: thread_id.clone(),
                        attempt: next_attempt,
                        next_step: 1,
                        current_step: None,
                    },
                    vec![
                        Effect::append(EventKind::Retry {
                            attempt: next_attempt,
                            reason: err.message.clone(),
                        }),
                        Effect::ScheduleRetry {
                            delay: retry_delay(next_attempt),
                            attempt: next_attempt,
                        },
                    ],
                ))
            } else {
                Ok((
                    Failed {
                        message: err.message.clone(),
                    },
                    vec![
                        Effect::append(EventKind::Error {
                            message: redact_credentials(&err.message),
                            recoverable: false,
                        }),
                        Effect::PersistTerminal,
                    ],
                ))
            }
        }

        (InFlight { thread_id, attempt, .. }, T::RetryTimeout { attempt: fired_attempt }) => {
            if fired_attempt != *attempt {
                // Stale timer from a superseded attempt; ignore.
                return Ok((state.clone(), vec![]));
            }
            Ok((
                InFlight {
                    thread_id: thread_id.clone(),
                    attempt: *attempt,
                    next_step: 1,
                    current_step: None,
                },
                vec![
                    Effect::append(EventKind::RunStart {
                        alert: ctx.alert_text.clone(),
                        thread_id: thread_id.clone(),
                    }),
                    Effect::RequestAgentRun {
                        thread_id: thread_id.clone(),
                    },
                ],
            ))
        }

        (InFlight { thread_id, .. }, T::UserCancel) => Ok((
            Cancelling {
                thread_id: thread_id.clone(),
            },
            vec![Effect::RequestCancel],
        )),

        (InFlight { .. }, T::RunTimeout) => Ok((
            Failed {
                message: "run timeout".to_string(),
            },
            vec![
                Effect::append(EventKind::Error {
                    message: "run timeout".to_string(),
                    recoverable: false,
                }),
                Effect::PersistTerminal,
            ],
        )),

        (s, t) => Err(TransitionError::InvalidTransition(
            format!("{t:?}"),
            format!("{s:?}"),
        )),
    }
}

impl std::fmt::Debug for WorkerTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerTrigger::Start => write!(f, "Start"),
            WorkerTrigger::ThreadCreated { .. } => write!(f, "ThreadCreated"),
            WorkerTrigger::StepStart { .. } => write!(f, "StepStart"),
            WorkerTrigger::StepComplete { .. } => write!(f, "StepComplete"),
            WorkerTrigger::MessageDelta { .. } => write!(f, "MessageDelta"),
            WorkerTrigger::MessageCreate { .. } => write!(f, "MessageCreate"),
            WorkerTrigger::RunEnded { .. } => write!(f, "RunEnded"),
            WorkerTrigger::SdkError(_) => write!(f, "SdkError"),
            WorkerTrigger::UserCancel => write!(f, "UserCancel"),
            WorkerTrigger::RetryTimeout { .. } => write!(f, "RetryTimeout"),
            WorkerTrigger::RunTimeout => write!(f, "RunTimeout"),
        }
    }
}
