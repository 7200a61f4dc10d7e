//! Route handler functions for all API endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kairon_core::types::{ActionReply, ActionRequest};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Audit records written since start.
    pub logs_written: u64,
    /// Audit writes that failed and were dropped.
    pub log_failures: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionsResponse {
    pub action_types: Vec<String>,
}

// =============================================================================
// Webhook
// =============================================================================

/// POST /webhook - run the requested action.
pub async fn webhook(
    State(state): State<AppState>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionReply>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest {
        message: rejection.body_text(),
        action_name: None,
    })?;
    debug!(
        action = %request.next_action,
        sender = %request.sender_id,
        version = request.version.as_deref().unwrap_or("-"),
        "Webhook request"
    );

    let reply = state
        .executor
        .run(&request)
        .await
        .map_err(|e| ApiError::from_action(e, &request.next_action))?;

    info!(
        action = %request.next_action,
        events = reply.events.len(),
        responses = reply.responses.len(),
        "Action completed"
    );
    Ok(Json(reply))
}

// =============================================================================
// Introspection
// =============================================================================

/// GET /health - liveness plus audit-log counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let logger = &state.executor.services().logger;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        logs_written: logger.written(),
        log_failures: logger.failures(),
    })
}

/// GET /actions - registered action types.
pub async fn list_actions(State(state): State<AppState>) -> Json<ActionsResponse> {
    Json(ActionsResponse {
        action_types: state
            .executor
            .registry()
            .types()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect(),
    })
}
