//! Axum router for the discovery-service: a health check for load
//! balancers and a WebSocket upgrade for browser-based participants who
//! can't open a raw TCP socket. Both paths end up in the same
//! [`crate::dispatch::run`] loop as a plain TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use acip_transport::AxumWebSocketTransport;

use crate::state::DiscoveryState;

pub fn build_router(state: Arc<DiscoveryState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ws_upgrade(
    State(state): State<Arc<DiscoveryState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::info!(peer = %addr, "discovery WebSocket upgrade");
    ws.max_message_size(acip_protocol::MAX_PAYLOAD_LEN)
        .on_upgrade(move |socket| async move {
            let transport = Arc::new(AxumWebSocketTransport::new(socket, addr.to_string()));
            crate::dispatch::run(state, transport, addr.ip()).await;
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_sqlite::SwappableRateLimiter;
    use crate::session_registry::SessionRegistry;
    use acip_protocol::InMemoryRateLimiter;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let state = Arc::new(DiscoveryState::new(
            SessionRegistry::new(None, false, false),
            SwappableRateLimiter::new(Box::new(InMemoryRateLimiter::new())),
            None,
            false,
            false,
        ));
        let app = build_router(state);

        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
