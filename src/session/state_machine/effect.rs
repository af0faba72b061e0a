//! Side effects produced by a transition, interpreted by the worker's
//! executor loop. Kept as data rather than invoked directly so `transition`
//! stays a pure function with no I/O.

use std::time::Duration;

use crate::event::EventKind;

#[derive(Debug, Clone)]
pub enum Effect {
    /// Append an event to the session's history and fan it out to
    /// subscribers.
    AppendEvent(EventKind),

    /// Ask the worker's executor to (re)open a run with the agent client.
    RequestAgentRun { thread_id: Option<String> },

    /// Ask the agent client to cancel its in-flight run.
    RequestCancel,

    /// Schedule a `RetryTimeout { attempt }` trigger after `delay`.
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Flush the terminal record through the persistence adapter.
    PersistTerminal,
}

impl Effect {
    pub fn append(kind: EventKind) -> Self {
        Effect::AppendEvent(kind)
    }
}

/// Exponential backoff matching `MAX_RETRIES`: attempt 1 waits 1s, attempt
/// 2 waits 2s, attempt 3 waits 4s.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
    }
}
