//! Pure state for one session's agent run.

/// Per-session configuration and bookkeeping the pure `transition` function
/// needs but does not own; threaded through every call alongside the state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub orchestrator_agent_id: String,
    pub sub_agent_ids: Vec<String>,
    pub alert_text: String,
    pub max_retries: u32,
    pub query_truncate_chars: usize,
    pub response_truncate_chars: usize,
}

impl RunContext {
    pub fn new(orchestrator_agent_id: impl Into<String>, alert_text: impl Into<String>) -> Self {
        Self {
            orchestrator_agent_id: orchestrator_agent_id.into(),
            sub_agent_ids: Vec::new(),
            alert_text: alert_text.into(),
            max_retries: 3,
            query_truncate_chars: 1000,
            response_truncate_chars: 5000,
        }
    }

    pub fn with_sub_agents(mut self, ids: Vec<String>) -> Self {
        self.sub_agent_ids = ids;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_truncate_limits(mut self, query_chars: usize, response_chars: usize) -> Self {
        self.query_truncate_chars = query_chars;
        self.response_truncate_chars = response_chars;
        self
    }
}

/// The worker's internal view of a session's progress. Distinct from
/// `SessionStatus` (the coarse, client-visible status): `Cancelling`
/// collapses to `SessionStatus::Running` on the wire until the pending
/// callback resolves into `Cancelled`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionMachineState {
    #[default]
    Pending,

    /// A run is in flight. `next_step` is the step number to assign on the
    /// next `StepStart` and resets to 1 on every retry; `current_step` is
    /// `Some` only between a `StepStart` and its matching `StepComplete`.
    InFlight {
        thread_id: Option<String>,
        attempt: u32,
        next_step: u32,
        current_step: Option<u32>,
    },

    /// Cancellation requested; waiting for the current SDK callback to
    /// return before transitioning to `Cancelled`.
    Cancelling {
        thread_id: Option<String>,
    },

    Completed {
        final_message: String,
    },

    Failed {
        message: String,
    },

    Cancelled,
}

impl SessionMachineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionMachineState::Completed { .. }
                | SessionMachineState::Failed { .. }
                | SessionMachineState::Cancelled
        )
    }

    pub fn thread_id(&self) -> Option<&str> {
        match self {
            SessionMachineState::InFlight { thread_id, .. }
            | SessionMachineState::Cancelling { thread_id } => thread_id.as_deref(),
            _ => None,
        }
    }

    pub fn to_session_status(&self) -> crate::event::SessionStatus {
        use crate::event::SessionStatus;
        match self {
            SessionMachineState::Pending => SessionStatus::Pending,
            SessionMachineState::InFlight { .. } | SessionMachineState::Cancelling { .. } => {
                SessionStatus::Running
            }
            SessionMachineState::Completed { .. } => SessionStatus::Completed,
            SessionMachineState::Failed { .. } => SessionStatus::Failed,
            SessionMachineState::Cancelled => SessionStatus::Cancelled,
        }
    }
}
