//! /lookup and /status handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use burrow_core::wire::MAX_ID_LEN;
use burrow_services::SharedDirectory;

#[derive(Clone)]
pub struct ApiState {
    pub directory: SharedDirectory,
    /// Admission limit on concurrent lookups.
    pub admission: Arc<Semaphore>,
}

impl ApiState {
    pub fn new(directory: SharedDirectory, max_connections: usize) -> Self {
        Self {
            directory,
            admission: Arc::new(Semaphore::new(max_connections)),
        }
    }
}

// ── /lookup ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LookupParams {
    pub q: Option<String>,
}

pub async fn handle_lookup(
    State(state): State<ApiState>,
    Query(params): Query<LookupParams>,
) -> (StatusCode, String) {
    let Ok(_permit) = state.admission.try_acquire() else {
        tracing::debug!("lookup rejected: admission limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string());
    };

    let query = params.q.unwrap_or_default();
    let id = query.trim();
    if id.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing query".to_string());
    }
    if id.len() > MAX_ID_LEN {
        return (StatusCode::BAD_REQUEST, "query too long".to_string());
    }

    match burrow_services::lookup(&state.directory, id).await {
        Some(addr) => {
            tracing::trace!(id, %addr, "lookup hit");
            (StatusCode::OK, addr)
        }
        None => (StatusCode::NOT_FOUND, "no such entry".to_string()),
    }
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub peers: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let peers = state.directory.lock().await.len();
    Json(StatusResponse { peers })
}
