//! Abstraction over the (out-of-scope) agent-runtime SDK.
//!
//! The engine treats the SDK as an opaque callback source: something that,
//! given a thread handle and an alert, streams `SdkEvent`s until it signals
//! end-of-run. Production wiring to the real SDK lives outside this crate;
//! here we define the seam and the deterministic test double that drives
//! every integration test.

mod mock;

pub use mock::{DelayedMockAgentClient, MockAgentClient};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One callback delivered by the agent SDK while a run is in flight.
///
/// Mirrors the five callback shapes named in the design: run-step-start,
/// run-step-complete, message-delta, message-create and run-state-change are
/// folded into these variants; `Error` covers the SDK's own error callback.
#[derive(Debug, Clone)]
pub enum SdkEvent {
    ThreadCreated {
        thread_id: String,
    },
    StepStart {
        agent: String,
    },
    StepComplete {
        agent: String,
        /// Raw tool-call arguments, not yet split into query/reasoning.
        raw_arguments: String,
        response: String,
    },
    MessageDelta {
        text: String,
    },
    /// An intermediate assistant message between tool calls. The SDK may or
    /// may not ever produce these; the translator treats their absence as
    /// conformant.
    MessageCreate {
        text: String,
    },
    /// Final assistant message ending the run, with token usage if reported.
    RunEnded {
        final_message: String,
        tokens: Option<u64>,
    },
    Error(AgentError),
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    Network,
    Timeout,
    RateLimit,
    Schema,
    MissingAgent,
    Validation,
    Unknown,
}

impl AgentErrorKind {
    /// Transport errors and timeouts are recoverable; schema errors, missing
    /// agent ids, and validation failures are fatal.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            AgentErrorKind::Network | AgentErrorKind::Timeout | AgentErrorKind::RateLimit
        )
    }
}

impl AgentError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Validation,
            message: message.into(),
        }
    }
}

/// A handle to one in-flight run, used by the worker to request cancellation
/// at its next safe point.
pub struct RunHandle {
    pub events: mpsc::Receiver<SdkEvent>,
    pub cancel: CancellationToken,
}

/// The seam between the worker and the out-of-scope agent-runtime SDK.
///
/// `Arc<T>` blanket-implements this for any `T: AgentClient`, matching the
/// delegation pattern used for the storage and LLM-client traits elsewhere
/// in this crate, so the same `Arc<dyn AgentClient>` can be shared across
/// worker tasks without cloning the underlying client.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Starts (or resumes, if `thread_id` is `Some`) a run for the given
    /// orchestrator/sub-agent ids and alert text, returning a handle whose
    /// event channel is fed until the run ends or is cancelled.
    async fn start_run(
        &self,
        thread_id: Option<String>,
        orchestrator_agent_id: &str,
        sub_agent_ids: &[String],
        alert_text: &str,
    ) -> Result<RunHandle, AgentError>;
}

#[async_trait]
impl<T: AgentClient + ?Sized> AgentClient for std::sync::Arc<T> {
    async fn start_run(
        &self,
        thread_id: Option<String>,
        orchestrator_agent_id: &str,
        sub_agent_ids: &[String],
        alert_text: &str,
    ) -> Result<RunHandle, AgentError> {
        (**self)
            .start_run(thread_id, orchestrator_agent_id, sub_agent_ids, alert_text)
            .await
    }
}
