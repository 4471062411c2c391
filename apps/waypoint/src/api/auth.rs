//! # Authentication Module
//!
//! Bearer-token authentication for the Waypoint HTTP API.
//!
//! `POST /user/create` creates a root and issues a token for it. Every
//! walker request must carry that token; the request then runs as the
//! token's root. Tokens live for the lifetime of the process.
//!
//! ## Usage
//!
//! ```text
//! Authorization: Bearer <token>
//! ```

use super::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use waypoint_core::AnchorId;

// =============================================================================
// TOKEN STORE
// =============================================================================

/// The root a request is acting as, set by [`require_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerRoot(pub AnchorId);

/// Issued tokens and the roots they act as.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    tokens: Arc<RwLock<Vec<(String, AnchorId)>>>,
}

impl TokenStore {
    /// Issue a new random token for `root`.
    pub async fn issue(&self, root: AnchorId) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens.write().await.push((token.clone(), root));
        token
    }

    /// The root `token` was issued for.
    ///
    /// Every stored token is compared, so timing does not depend on which
    /// one matched.
    pub async fn resolve(&self, token: &str) -> Option<AnchorId> {
        let tokens = self.tokens.read().await;
        let mut found = None;
        for (candidate, root) in tokens.iter() {
            if tokens_match(token, candidate) && found.is_none() {
                found = Some(*root);
            }
        }
        found
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

/// Constant-time token comparison.
///
/// Both sides are padded to the same length so `ct_eq` always runs over
/// the same number of bytes.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let max_len = provided_bytes.len().max(expected_bytes.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided_bytes.len()].copy_from_slice(provided_bytes);
    padded_expected[..expected_bytes.len()].copy_from_slice(expected_bytes);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided_bytes.len() == expected_bytes.len()
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Resolve the bearer token to a root and attach it as [`CallerRoot`].
///
/// Requests without a known token get 401.
pub async fn require_root(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::warn!(
            event = "auth_failure",
            reason = "missing_authorization_header",
            "Missing Authorization header"
        );
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    match state.tokens.resolve(token).await {
        Some(root) => {
            request.extensions_mut().insert(CallerRoot(root));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "unknown_token",
                "Authentication failed: unknown token"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
