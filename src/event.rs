//! The closed, tagged event taxonomy that makes up a session's history.

use serde::{Deserialize, Serialize};

/// One entry in a session's totally ordered history.
///
/// `seq` is strictly monotonic and gap-free within a session; `ts` is a
/// millisecond Unix timestamp. `kind` carries the payload, closed over the
/// variants below so every consumer (persistence, SSE gateway, tests)
/// exhaustively matches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub ts: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(seq: u64, ts: i64, kind: EventKind) -> Self {
        Self { seq, ts, kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    RunStart {
        alert: String,
        thread_id: Option<String>,
    },
    ThreadCreated {
        thread_id: String,
    },
    StepStart {
        step: u32,
        agent: String,
    },
    StepComplete {
        step: u32,
        agent: String,
        duration_ms: u64,
        query: String,
        reasoning: String,
        response: String,
        error: bool,
    },
    Thinking {
        text: String,
    },
    MessageDelta {
        text: String,
    },
    Message {
        text: String,
    },
    Retry {
        attempt: u32,
        reason: String,
    },
    RunComplete {
        steps: u32,
        tokens: Option<u64>,
        duration_ms: u64,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    /// Inserted by the SSE gateway, never by the worker.
    Keepalive {},
}

impl EventKind {
    /// True for the two event kinds that mark the end of a session's
    /// history (invariant 2, "terminality").
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RunComplete { .. })
            || matches!(self, EventKind::Error { recoverable: false, .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::RunStart { .. } => "run_start",
            EventKind::ThreadCreated { .. } => "thread_created",
            EventKind::StepStart { .. } => "step_start",
            EventKind::StepComplete { .. } => "step_complete",
            EventKind::Thinking { .. } => "thinking",
            EventKind::MessageDelta { .. } => "message_delta",
            EventKind::Message { .. } => "message",
            EventKind::Retry { .. } => "retry",
            EventKind::RunComplete { .. } => "run_complete",
            EventKind::Error { .. } => "error",
            EventKind::Keepalive {} => "keepalive",
        }
    }
}

/// Status of a session, transitioned monotonically by the worker alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_label_matches_serde_tag() {
        let e = EventKind::StepStart {
            step: 1,
            agent: "topology".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], e.label());
    }

    #[test]
    fn terminal_kinds() {
        assert!(EventKind::RunComplete {
            steps: 1,
            tokens: None,
            duration_ms: 0
        }
        .is_terminal());
        assert!(EventKind::Error {
            message: "x".into(),
            recoverable: false
        }
        .is_terminal());
        assert!(!EventKind::Error {
            message: "x".into(),
            recoverable: true
        }
        .is_terminal());
        assert!(!EventKind::Thinking { text: "x".into() }.is_terminal());
    }
}
