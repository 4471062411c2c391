//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Runtime status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub anchor_count: usize,
    pub root_count: usize,
    pub archetypes: usize,
    pub workers: usize,
    pub walkers: Vec<String>,
}

// =============================================================================
// USER RESPONSE
// =============================================================================

/// A freshly created root and the bearer token that acts as it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub root_id: String,
    pub token: String,
}

// =============================================================================
// WALKER RESPONSE
// =============================================================================

/// Outcome of a walker run.
///
/// `status` mirrors the HTTP status code; `reports` is empty on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerResponse {
    pub status: u16,
    pub reports: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalkerResponse {
    /// Create a successful response.
    #[must_use]
    pub fn success(reports: Vec<Value>) -> Self {
        Self {
            status: 200,
            reports,
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            reports: Vec::new(),
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
