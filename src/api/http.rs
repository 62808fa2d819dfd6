//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::websocket::{ws_handler, AppState};

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origin);

    Router::new()
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Health checks
        .route("/healthcheck", get(healthcheck))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured origin; `*` (or an unparsable value) allows any
fn cors_layer(origin: &str) -> CorsLayer {
    let allow = if origin == "*" {
        AllowOrigin::any()
    } else {
        match origin.parse::<HeaderValue>() {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Invalid CORS origin, allowing any");
                AllowOrigin::any()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Liveness plus the identity of this instance
async fn healthcheck(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "port": state.port,
        "originTag": state.instance.origin_tag(),
        "liveConnections": state.instance.local_live_count().await,
    }))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::relay::{InstanceOptions, RelayInstance};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let backend = Arc::new(MemoryBackend::new());
        let instance = RelayInstance::start(backend.clone(), backend, InstanceOptions::new("5001"))
            .await
            .unwrap();
        Arc::new(AppState::new(Arc::new(instance), 5001))
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_healthcheck_reports_port() {
        let app = create_router(test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["port"], 5001);
        assert_eq!(json["originTag"], "5001");
        assert_eq!(json["liveConnections"], 0);
    }

    #[test]
    fn test_cors_layer_accepts_wildcard_and_exact() {
        let _ = cors_layer("*");
        let _ = cors_layer("http://localhost:3000");
    }
}
