// src/tests/web.rs
use crate::app_state::AppState;
use crate::broadcast_channel::BroadcastChannel;
use crate::config::ServerConfig;
use crate::dedup_filter::DedupFilter;
use crate::record_validator::RecordValidator;
use crate::relay::Relay;
use crate::relay_web::build_relay_router;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt; // for .oneshot()

fn test_state() -> Arc<AppState> {
    let relay = Relay::new(
        RecordValidator::default(),
        Arc::new(DedupFilter::new(Duration::from_secs(300))),
        Arc::new(BroadcastChannel::new(8)),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    Arc::new(AppState::new(Arc::new(relay), shutdown_tx))
}

fn app(state: &Arc<AppState>) -> Router {
    build_relay_router(Arc::clone(state), &ServerConfig::default())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let (status, body) = get_json(app(&test_state()), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readyz_follows_readiness_flag() {
    let state = test_state();
    let (_, body) = get_json(app(&state), "/readyz").await;
    assert_eq!(body["ready"], false);

    state.set_ready(true);
    let (_, body) = get_json(app(&state), "/readyz").await;
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn stats_reflect_processed_payloads() {
    let state = test_state();
    let _subscriber = state.relay.channel().register().unwrap();
    let payload = br#"{"timestamp":"2024-01-15T00:00:00Z","level":"WARN","message":"disk 91%","service":"node"}"#;
    state.relay.process(payload);
    state.relay.process(payload);
    state.relay.process(b"{}");

    let (status, body) = get_json(app(&state), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribers"]["subscribers"], 1);
    assert_eq!(body["subscribers"]["delivered_total"], 1);
    assert_eq!(body["dedup"]["tracked_keys"], 1);
    assert_eq!(body["dedup"]["window_secs"], 300);
    assert_eq!(body["relay"]["received"], 3);
    assert_eq!(body["relay"]["duplicates"], 1);
    assert_eq!(body["relay"]["rejected"], 1);
}

#[tokio::test]
async fn any_origin_is_allowed_by_default() {
    let req = Request::builder()
        .uri("/healthz")
        .header("Origin", "http://dashboard.local")
        .body(Body::empty())
        .unwrap();
    let response = app(&test_state()).oneshot(req).await.unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn origin_list_restricts_cors() {
    let server = ServerConfig {
        cors_allowed_origins: vec!["http://dashboard.local".into()],
        ..ServerConfig::default()
    };
    let router = build_relay_router(test_state(), &server);

    let allowed = Request::builder()
        .uri("/healthz")
        .header("Origin", "http://dashboard.local")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(allowed).await.unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://dashboard.local"
    );

    let other = Request::builder()
        .uri("/healthz")
        .header("Origin", "http://elsewhere.local")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(other).await.unwrap();
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn plain_get_on_ws_is_refused() {
    let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let response = app(&test_state()).oneshot(req).await.unwrap();
    assert!(response.status().is_client_error());
}
