//! # Waypoint HTTP API Module
//!
//! This module implements the HTTP boundary of the runtime using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Store and runtime counters
//! - `POST /user/create` - Create a root and receive its bearer token
//! - `POST /walker/{name}` - Run a walker from the caller's root
//! - `POST /walker/{name}/{node}` - Run a walker from a node
//!
//! Walker requests need `Authorization: Bearer <token>` and answer
//! `{status, reports}`. A start node the caller cannot read is a 403;
//! unknown walkers and ids are a 404.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `WAYPOINT_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `WAYPOINT_RATE_LIMIT`: Requests per second per caller (default: 100, 0 to disable)

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{CallerRoot, TokenStore, bearer_token, tokens_match};
pub use handlers::status_for;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{CreateUserResponse, HealthResponse, StatusResponse, WalkerResponse};

use crate::walkers::WalkerCatalog;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use waypoint_core::{Machine, WaypointError};

/// Maximum request body size (2 MB).
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The runtime every request opens a session on.
    pub machine: Arc<Machine>,
    /// Bearer tokens issued by `/user/create`.
    pub tokens: TokenStore,
    /// Walkers that can be started by name.
    pub catalog: Arc<WalkerCatalog>,
}

impl AppState {
    /// Create new app state over a machine with the built-in walkers.
    #[must_use]
    pub fn new(machine: Arc<Machine>) -> Self {
        Self {
            machine,
            tokens: TokenStore::default(),
            catalog: Arc::new(WalkerCatalog::builtin()),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `WAYPOINT_CORS_ORIGINS`.
///
/// - `*` allows all origins
/// - unset defaults to localhost only
/// - otherwise a comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("WAYPOINT_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (WAYPOINT_CORS_ORIGINS=*). Do not use this in production."
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in WAYPOINT_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restricted_cors(allowed_origins)
            }
        }
        None => {
            tracing::info!("CORS: No WAYPOINT_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - per bearer token (if enabled)
/// 4. Authentication - resolves the caller's root (walker routes only)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second per caller", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let walkers = Router::new()
        .route("/walker/{name}", post(handlers::walker_root_handler))
        .route("/walker/{name}/{node}", post(handlers::walker_node_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_root,
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/user/create", post(handlers::create_user_handler))
        .merge(walkers);

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `machine` on `addr` until Ctrl+C, then commit and close the store.
pub async fn run_server(addr: &str, machine: Arc<Machine>) -> Result<(), WaypointError> {
    let state = AppState::new(Arc::clone(&machine));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WaypointError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Waypoint HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| WaypointError::IoError(format!("Server error: {}", e)))?;

    machine.close()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn walker_routes_require_a_token() {
        let machine = Machine::in_memory().expect("machine");
        let router = create_router(AppState::new(machine));
        let response = router
            .oneshot(
                Request::post("/walker/list_items")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public() {
        let machine = Machine::in_memory().expect("machine");
        let router = create_router(AppState::new(machine));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
