//! Rate limiting for the dashboard's admin POST routes. Read routes are
//! polled by the operator's own browser and are not rate-limited here.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc};

pub const ADMIN_REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(ADMIN_REQUESTS_PER_MINUTE).unwrap());
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.limiter.check().is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}
