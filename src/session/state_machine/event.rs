//! Triggers fed into the pure `transition` function. These are the worker's
//! internal vocabulary — a `SdkEvent` from the agent client is translated
//! into one of these before reaching the state machine (see
//! `crate::translator`), and user-facing actions (`cancel`) and timers
//! (`RetryTimeout`, `RunTimeout`) are folded into the same enum so the
//! worker has a single place to drive transitions from.

use crate::agent::AgentError;

#[derive(Clone)]
pub enum WorkerTrigger {
    /// Issued once, when the worker is launched.
    Start,
    ThreadCreated {
        thread_id: String,
    },
    StepStart {
        agent: String,
    },
    StepComplete {
        agent: String,
        raw_arguments: String,
        response: String,
        /// Wall-clock duration of the step, measured by the worker (the
        /// pure transition function never reads a clock itself).
        duration_ms: u64,
        is_error: bool,
    },
    MessageDelta {
        text: String,
    },
    MessageCreate {
        text: String,
    },
    RunEnded {
        final_message: String,
        tokens: Option<u64>,
        duration_ms: u64,
    },
    SdkError(AgentError),
    UserCancel,
    RetryTimeout {
        attempt: u32,
    },
    RunTimeout,
}
