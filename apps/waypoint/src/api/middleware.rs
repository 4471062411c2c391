//! # Middleware Module
//!
//! Per-caller rate limiting for the Waypoint HTTP API.
//!
//! Each bearer token gets its own bucket; requests without a token share
//! one anonymous bucket.
//!
//! ## Configuration
//!
//! - `WAYPOINT_RATE_LIMIT`: Requests per second per caller (default: 100, 0 to disable)

use super::auth::bearer_token;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Default rate limit: 100 requests per second.
const DEFAULT_RPS: u32 = 100;

/// Bucket key for requests without a bearer token.
const ANONYMOUS: &str = "anonymous";

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Rate limiter keyed by bearer token.
pub type CallerRateLimiter = Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>;

/// Create a keyed rate limiter allowing `requests_per_second` per caller.
/// Zero falls back to the default.
pub fn create_rate_limiter(requests_per_second: u32) -> CallerRateLimiter {
    let rps = NonZeroU32::new(requests_per_second)
        .or(NonZeroU32::new(DEFAULT_RPS))
        .unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_second(rps)))
}

/// `WAYPOINT_RATE_LIMIT`, or 100 when unset or malformed.
pub fn get_rate_limit_from_env() -> u32 {
    std::env::var("WAYPOINT_RATE_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RPS)
}

/// Rate limiting middleware.
///
/// Returns 429 Too Many Requests once the caller's bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<CallerRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let key = bearer_token(request.headers()).unwrap_or(ANONYMOUS).to_string();
    match limiter.check_key(&key) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_per_caller() {
        let limiter = create_rate_limiter(1);
        assert!(limiter.check_key(&"a".to_string()).is_ok());
        assert!(limiter.check_key(&"a".to_string()).is_err());
        assert!(limiter.check_key(&"b".to_string()).is_ok());
    }

    #[test]
    fn zero_uses_default() {
        let limiter = create_rate_limiter(0);
        for _ in 0..10 {
            assert!(limiter.check_key(&ANONYMOUS.to_string()).is_ok());
        }
    }
}
