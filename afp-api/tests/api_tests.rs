//! Read-surface HTTP tests
//!
//! Drive the router directly with `tower::ServiceExt::oneshot`; no
//! listener is bound. Auth and rate limiting sit in front of the feature
//! endpoints; health stays public.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use afp_api::{api, build_router, AppState, RecentCache};
use afp_common::broker::{InMemoryBroker, MessageBroker};
use afp_common::db::{FeatureStore, MemoryStore};
use afp_common::messages::{FEATURES_A, FEATURES_B};
use afp_common::{FeatureRecord, FeatureType};

struct TestApp {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn FeatureStore>,
    router: axum::Router,
}

async fn test_app(rate_limit_max: u32) -> TestApp {
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let store: Arc<dyn FeatureStore> = Arc::new(MemoryStore::new());
    let cache = Arc::new(
        RecentCache::subscribe(broker.as_ref(), chrono::Duration::minutes(5))
            .await
            .unwrap(),
    );
    let limiter = api::ratelimit::build_limiter(rate_limit_max, 60).unwrap();
    let state = AppState::new(
        store.clone(),
        cache,
        ["test-token".to_string()],
        limiter,
    );
    TestApp {
        broker,
        store,
        router: build_router(state),
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn record(id: &str, timestamp: &str) -> FeatureRecord {
    FeatureRecord {
        message_id: id.to_string(),
        source_message_id: "audio-1".to_string(),
        feature_type: FeatureType::A,
        sensor_id: "s1".to_string(),
        timestamp: timestamp.to_string(),
        processed_at: "2024-01-15T10:00:01+00:00".to_string(),
        features: json!({"rms_energy": 0.11}),
    }
}

#[tokio::test]
async fn health_requires_no_auth() {
    let app = test_app(100).await;
    let response = app.router.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "afp-api");
}

#[tokio::test]
async fn missing_authorization_header_is_401() {
    let app = test_app(100).await;
    let response = app
        .router
        .oneshot(get("/features/realtime", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_authorization_header_is_401() {
    let app = test_app(100).await;
    let request = Request::builder()
        .uri("/features/realtime")
        .header("Authorization", "Token abc")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_token_is_403() {
    let app = test_app(100).await;
    let response = app
        .router
        .oneshot(get("/features/realtime", Some("wrong-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn realtime_returns_features_seen_on_both_topics() {
    let app = test_app(100).await;
    app.broker
        .publish_fanout(FEATURES_A, record("a-1", "2024-01-15T10:00:00+00:00").to_message())
        .await
        .unwrap();
    app.broker
        .publish_fanout(FEATURES_B, record("b-1", "2024-01-15T10:00:00+00:00").to_message())
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get("/features/realtime", Some("test-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 2);

    // The cache retains entries across requests within the window
    let response = app
        .router
        .oneshot(get("/features/realtime", Some("test-token")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn historical_requires_both_window_params() {
    let app = test_app(100).await;
    let response = app
        .router
        .clone()
        .oneshot(get("/features/historical", Some("test-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(get(
            "/features/historical?start=2024-01-15T10:00:00Z",
            Some("test-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn historical_rejects_malformed_timestamps() {
    let app = test_app(100).await;
    let response = app
        .router
        .oneshot(get(
            "/features/historical?start=yesterday&end=today",
            Some("test-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("ISO-8601"));
}

#[tokio::test]
async fn historical_rejects_inverted_window() {
    let app = test_app(100).await;
    let response = app
        .router
        .oneshot(get(
            "/features/historical?start=2024-01-15T12:00:00Z&end=2024-01-15T10:00:00Z",
            Some("test-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn historical_returns_stored_records_in_window() {
    let app = test_app(100).await;
    app.store
        .write(&record("in-window", "2024-01-15T10:30:00+00:00"))
        .await
        .unwrap();
    app.store
        .write(&record("outside", "2024-01-16T09:00:00+00:00"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(get(
            "/features/historical?start=2024-01-15T10:00:00Z&end=2024-01-15T11:00:00Z",
            Some("test-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["features"][0]["message_id"], "in-window");
}

#[tokio::test]
async fn requests_over_the_rate_limit_get_429() {
    let app = test_app(2).await;
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(get("/features/realtime", Some("test-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router
        .oneshot(get("/features/realtime", Some("test-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
