//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.

use super::{
    AppState,
    auth::CallerRoot,
    types::{CreateUserResponse, HealthResponse, StatusResponse, WalkerResponse},
};
use crate::walkers::run_walker;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use waypoint_core::{AnchorId, WaypointError, primitives::ROOT_ALIAS};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP status for a runtime error.
pub fn status_for(error: &WaypointError) -> StatusCode {
    match error {
        WaypointError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        WaypointError::ReferenceError(_) | WaypointError::UnknownArchetype(_) => {
            StatusCode::NOT_FOUND
        }
        WaypointError::InvalidTarget(_)
        | WaypointError::InvalidAttribute { .. }
        | WaypointError::TypeMismatch { .. }
        | WaypointError::DeserializationError(_) => StatusCode::BAD_REQUEST,
        WaypointError::SerializationError(_)
        | WaypointError::IoError(_)
        | WaypointError::WorkerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn internal(error: WaypointError) -> (StatusCode, String) {
    tracing::error!(error = %error, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Store and runtime counters.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let machine = &state.machine;
    let response = StatusResponse {
        anchor_count: machine.store().len().map_err(internal)?,
        root_count: machine.roots().map_err(internal)?.len(),
        archetypes: machine.registry().len(),
        workers: machine.pool().workers(),
        walkers: state
            .catalog
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };
    Ok(Json(response))
}

// =============================================================================
// USER HANDLER
// =============================================================================

/// Create a root and issue a bearer token acting as it.
pub async fn create_user_handler(
    State(state): State<AppState>,
) -> Result<Json<CreateUserResponse>, (StatusCode, String)> {
    let root = state.machine.create_root().map_err(internal)?;
    state.machine.commit().map_err(internal)?;
    let token = state.tokens.issue(root.id()).await;
    tracing::info!(root = %root.id(), "user created");

    Ok(Json(CreateUserResponse {
        root_id: root.id().to_string(),
        token,
    }))
}

// =============================================================================
// WALKER HANDLERS
// =============================================================================

/// Run walker `name` from the caller's root.
pub async fn walker_root_handler(
    State(state): State<AppState>,
    Extension(CallerRoot(root)): Extension<CallerRoot>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    run(&state, root, &name, ROOT_ALIAS, &body)
}

/// Run walker `name` from `node`.
pub async fn walker_node_handler(
    State(state): State<AppState>,
    Extension(CallerRoot(root)): Extension<CallerRoot>,
    Path((name, node)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    run(&state, root, &name, &node, &body)
}

fn run(
    state: &AppState,
    root: AnchorId,
    name: &str,
    start: &str,
    body: &[u8],
) -> (StatusCode, Json<WalkerResponse>) {
    let args = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(args) => args,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(WalkerResponse::error(400, format!("Invalid arguments: {}", e))),
                );
            }
        }
    };

    let outcome = state
        .machine
        .session(Some(root))
        .and_then(|session| run_walker(&session, &state.catalog, name, start, args));

    match outcome {
        Ok(reports) => (StatusCode::OK, Json(WalkerResponse::success(reports))),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!(walker = name, error = %e, "walker failed");
            } else {
                tracing::debug!(walker = name, error = %e, "walker rejected");
            }
            (status, Json(WalkerResponse::error(status.as_u16(), e.to_string())))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
