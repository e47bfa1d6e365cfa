//! Axum-based event-stream server.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use ssewire_core::protocol::Message;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::sink::ChannelSink;
use crate::state::ServerState;

/// Build the router: `GET /events`, `POST /publish`, `GET /health`.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C or until `state.shutdown` is cancelled.
pub async fn start_server(state: Arc<ServerState>, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Event stream server listening on {}", listener.local_addr()?);
    serve(state, listener).await
}

/// Serve on an already bound listener.
///
/// On shutdown the root request context is cancelled, so every open stream
/// ends and graceful shutdown can complete.
pub async fn serve(state: Arc<ServerState>, listener: TcpListener) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = ctrl_c() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => info!("Shutdown requested"),
            }
            shutdown.cancel();
        })
        .await?;

    state.hub.shutdown_all().await;
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
}

async fn events_handler(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let ctx = state.shutdown.child_token();
    let (sink, pending) = ChannelSink::new(state.body_capacity, ctx.clone());

    match state.upgrader.upgrade(sink, ctx).await {
        Ok(conn) => {
            let last_event_id = headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            info!(conn_id = %conn.id(), last_event_id, "Client subscribed");

            state.hub.register(conn.clone()).await;
            let state = state.clone();
            tokio::spawn(async move {
                conn.closed().await;
                state.hub.remove(conn.id()).await;
            });
        }
        Err(e) => warn!(%e, "Event stream upgrade failed"),
    }

    pending.into_response().await
}

async fn publish_handler(
    State(state): State<Arc<ServerState>>,
    Json(message): Json<Message>,
) -> Response {
    if let Err(e) = message.validate() {
        warn!(%e, "Rejected publish");
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
    }
    let delivered = state.hub.broadcast(message).await;
    Json(json!({ "delivered": delivered })).into_response()
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.hub.len().await;

    Json(json!({
        "status": "ok",
        "version": version,
        "connections": connections,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let state = Arc::new(ServerState::default());
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let state = Arc::new(ServerState::default());
        let response = router(state)
            .oneshot(
                Request::post("/publish")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"event":"tick","data":"1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["delivered"], 0);
    }

    #[tokio::test]
    async fn test_publish_rejects_line_break_in_event() {
        let state = Arc::new(ServerState::default());
        let (sink, recorded) = crate::test_support::RecordingSink::new();
        let conn = state
            .upgrader
            .upgrade(sink, tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();
        state.hub.register(conn.clone()).await;

        let response = router(state)
            .oneshot(
                Request::post("/publish")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"event":"a\n\ndata: injected","data":"real"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        conn.shutdown();
        conn.closed().await;
        assert!(recorded.lock().unwrap().flushed.is_empty());
    }

    #[tokio::test]
    async fn test_events_response_headers() {
        let state = Arc::new(ServerState::default());
        let response = router(state.clone())
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(state.hub.len().await, 1);

        // Dropping the body is what a disconnecting peer looks like.
        drop(response);
        for _ in 0..100 {
            if state.hub.is_empty().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("connection not removed after body was dropped");
    }
}
