//! Session Orchestration Engine
//!
//! Drives a root orchestrator agent's investigation of an infrastructure
//! alert, multiplexing its event stream to any number of reconnecting SSE
//! subscribers.

mod agent;
mod api;
mod broadcaster;
mod config;
mod error;
mod event;
mod persistence;
mod sanitize;
mod scenario;
mod session;
mod translator;
mod worker;

use std::sync::Arc;

use api::{create_router, AppState};
use config::EngineConfig;
use persistence::{SessionPersistenceAdapter, SqlitePersistenceAdapter};
use scenario::ScenarioRegistry;
use session::SessionStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alert_orchestrator=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = EngineConfig::from_env();

    tracing::info!(path = %config.db_path, "opening session store");
    let persistence: Arc<dyn SessionPersistenceAdapter> =
        Arc::new(SqlitePersistenceAdapter::open(&config.db_path)?);

    let scenarios = Arc::new(ScenarioRegistry::from_env());
    let store = Arc::new(SessionStore::new(persistence, config.clone()));

    // The agent-runtime SDK is an external collaborator; production wiring
    // lives outside this crate. `MockAgentClient` keeps the engine runnable
    // standalone and is what every integration test drives against.
    let agent_client: Arc<dyn agent::AgentClient> = Arc::new(agent::MockAgentClient::new());

    let state = AppState::new(store, agent_client, scenarios, config.clone());

    let mut cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    cors = match &config.cors_origin {
        Some(origin) => cors.allow_origin(origin.parse::<axum::http::HeaderValue>()?),
        None => cors.allow_origin(Any),
    };

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("alert orchestration engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
