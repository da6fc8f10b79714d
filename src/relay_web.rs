use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::connection_manager::websocket_handler;
use crate::errors::RelayError;
use axum::{
    extract::State,
    http::HeaderValue,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the relay router: subscriber channel, health checks and stats
pub fn build_relay_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .layer(cors_layer(server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Subscribers are unauthenticated, so CORS is the only origin policy.
pub fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.allows_any_origin() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = server
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ready": state.is_ready() }))
}

async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, RelayError> {
    let relay = &state.relay;
    Ok(Json(serde_json::json!({
        "ready": state.is_ready(),
        "uptimeSecs": state.uptime_secs(),
        "subscribers": relay.channel().stats()?,
        "dedup": relay.dedup().stats()?,
        "relay": relay.metrics(),
    })))
}
