//! HTTP surface: session lifecycle endpoints plus the SSE stream.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use std::sync::Arc;

use crate::agent::AgentClient;
use crate::config::EngineConfig;
use crate::scenario::ScenarioRegistry;
use crate::session::SessionStore;

/// Shared state handed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub agent_client: Arc<dyn AgentClient>,
    pub scenarios: Arc<ScenarioRegistry>,
    pub config: EngineConfig,
}

impl AppState {
    pub fn new(
        store: Arc<SessionStore>,
        agent_client: Arc<dyn AgentClient>,
        scenarios: Arc<ScenarioRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            agent_client,
            scenarios,
            config,
        }
    }
}
