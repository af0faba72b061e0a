//! Request/response DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::SessionStatus;
use crate::persistence::SessionSummary;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub alert: String,
    pub scenario: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub from_seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub scenario: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub items: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct SessionMetadataResponse {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seq: u64,
}
