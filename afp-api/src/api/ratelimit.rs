//! Per-client request rate limiting
//!
//! Keyed limiter over the client address: each client may burst up to the
//! configured maximum, replenished evenly across the window. Requests over
//! the limit get 429 and do not reach the handler.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::warn;

use afp_common::{Error, Result};

use crate::AppState;

use super::ApiError;

pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Build a keyed limiter allowing `max` requests per client per `window`
pub fn build_limiter(max: u32, window_secs: u64) -> Result<KeyedLimiter> {
    let max = NonZeroU32::new(max)
        .ok_or_else(|| Error::Config("rate_limit_max must be positive".into()))?;
    let window = Duration::from_secs(window_secs.max(1));
    let quota = Quota::with_period(window / max.get())
        .ok_or_else(|| Error::Config("rate limit window too small".into()))?
        .allow_burst(max);
    Ok(RateLimiter::keyed(quota))
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if state.limiter.check_key(&client).is_err() {
        warn!("Rate limit exceeded client={client}");
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(request).await)
}
