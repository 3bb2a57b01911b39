//! afp-api library - Read surface for the audio feature pipeline
//!
//! Serves two authenticated endpoints over the pipeline's output: a
//! real-time view fed by fan-out subscriptions and a historical view
//! backed by the feature store. The cache subscriptions must be
//! registered before the pipeline starts publishing; the composition
//! root in `main.rs` owns that ordering.

use std::collections::HashSet;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use afp_common::db::FeatureStore;

pub mod api;
pub mod cache;

pub use cache::RecentCache;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Historical reads go straight to the writer's store
    pub store: Arc<dyn FeatureStore>,
    /// Real-time reads drain the fan-out subscriptions into this cache
    pub cache: Arc<RecentCache>,
    /// Accepted bearer tokens
    pub tokens: Arc<HashSet<String>>,
    pub limiter: Arc<api::ratelimit::KeyedLimiter>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        cache: Arc<RecentCache>,
        tokens: impl IntoIterator<Item = String>,
        limiter: api::ratelimit::KeyedLimiter,
    ) -> Self {
        Self {
            store,
            cache,
            tokens: Arc::new(tokens.into_iter().collect()),
            limiter: Arc::new(limiter),
        }
    }
}

/// Build the application router.
///
/// Feature endpoints require auth and are rate limited; health is public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .route("/features/realtime", get(api::features::realtime))
        .route("/features/historical", get(api::features::historical))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::ratelimit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::auth_middleware,
        ));

    let public = Router::new().route("/health", get(api::health::health_check));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
