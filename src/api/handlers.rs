//! HTTP request handlers for the session lifecycle surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::sse;
use super::types::{
    CreateSessionRequest, CreateSessionResponse, ListSessionsQuery, ListSessionsResponse,
    SessionMetadataResponse, StreamQuery,
};
use super::AppState;
use crate::error::ApiError;
use crate::worker;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/stream", get(stream_session))
        .route("/sessions/:id/cancel", post(cancel_session))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let scenario = state.scenarios.resolve(&req.scenario)?;
    let session = state
        .store
        .create(
            req.alert,
            req.scenario,
            scenario.orchestrator_agent_id.clone(),
            scenario.sub_agent_ids.clone(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id.clone(),
        }),
    ))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let items = state
        .store
        .list(query.scenario, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(ListSessionsResponse { items }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionMetadataResponse>, ApiError> {
    if let Some(session) = state.store.get(&id).await {
        let status = session.status().await;
        let last_seq = session.last_seq().await;
        let inner = session.inner.lock().await;
        return Ok(Json(SessionMetadataResponse {
            id: session.id.clone(),
            status,
            created_at: session.created_at,
            updated_at: inner.updated_at,
            last_seq,
        }));
    }

    let record = state.store.persistence().load(&id).await.map_err(ApiError::from)?;
    Ok(Json(SessionMetadataResponse {
        id: record.id,
        status: record.status,
        created_at: record.created_at,
        updated_at: record.updated_at,
        last_seq: record.history.last().map_or(0, |e| e.seq),
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let from_seq = query.from_seq.unwrap_or(0);

    if let Some(session) = state.store.get(&id).await {
        if session.should_start_worker() {
            tokio::spawn(worker::run(
                session.clone(),
                state.store.clone(),
                state.agent_client.clone(),
            ));
        }
        let (replay, subscriber) = session.subscribe(from_seq).await;
        return Ok(sse::stream(replay, subscriber, state.config.keepalive_interval).into_response());
    }

    let record = state.store.persistence().load(&id).await.map_err(ApiError::from)?;
    let replay: Vec<_> = record.history.into_iter().filter(|e| e.seq > from_seq).collect();
    Ok(sse::replay_only(replay, state.config.keepalive_interval).into_response())
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.store.get(&id).await {
        Some(session) => {
            session.request_cancel().await;
            Ok(StatusCode::ACCEPTED)
        }
        None => {
            // Already terminal and retired: cancelling it again is a no-op,
            // not an error, as long as the id is known at all.
            state.store.persistence().load(&id).await.map_err(ApiError::from)?;
            Ok(StatusCode::ACCEPTED)
        }
    }
}
