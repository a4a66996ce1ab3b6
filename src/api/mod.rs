pub mod error;
mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::{InvocationBroker, PendingCalls};
use crate::hub::ToolHub;

use handlers::*;

/// Default deadline for a tool call when the request does not give one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct AppState {
    pub hub: ToolHub,
    pub broker: InvocationBroker,
    /// Deadline used when `timeout_ms` is not supplied.
    pub call_timeout: Duration,
    /// Cancelled on server shutdown; in-flight calls and sockets observe it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire a fresh hub to a broker that publishes through it.
    pub fn new(call_timeout: Duration) -> Self {
        let hub = ToolHub::new();
        let broker = InvocationBroker::new(Arc::new(hub.clone()), PendingCalls::new());
        Self {
            hub,
            broker,
            call_timeout,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(session_list))
        .route("/sessions/{session_id}/tools/{name}", post(invoke_tool))
        .route("/toolhub", get(toolhub_ws))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ResultEnvelope, ServerMessage};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt; // for oneshot()

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(AppState::new(DEFAULT_CALL_TIMEOUT));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["pending_calls"], 0);
    }

    #[tokio::test]
    async fn test_sessions_lists_registered_dispatchers() {
        let state = AppState::new(DEFAULT_CALL_TIMEOUT);
        let (conn, _rx) = state.hub.connect();
        state.hub.register(conn, "s1", Some("kernel-1".into())).unwrap();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["sessionId"], "s1");
        assert_eq!(json[0]["kernelId"], "kernel-1");
    }

    #[tokio::test]
    async fn test_invoke_times_out_without_dispatcher() {
        let state = AppState::new(DEFAULT_CALL_TIMEOUT);
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/nobody/tools/echo?timeout_ms=50")
                    .body(Body::from(r#"{"x":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "tool_call_timeout");
        assert_eq!(state.broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_rejects_non_json_body() {
        let app = router(AppState::new(DEFAULT_CALL_TIMEOUT));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/s1/tools/echo")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invoke_returns_resolved_output() {
        let state = AppState::new(DEFAULT_CALL_TIMEOUT);
        let (conn, mut rx) = state.hub.connect();
        state.hub.register(conn, "s1", None).unwrap();
        rx.recv().await.unwrap(); // registered ack

        // Answer the call as a dispatcher would.
        let broker = state.broker.clone();
        tokio::spawn(async move {
            if let Some(ServerMessage::ToolCall(call)) = rx.recv().await {
                let reply = ResultEnvelope::success(&call, call.arguments_payload.clone());
                broker.resolve(&call.call_id, reply);
            }
        });

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/s1/tools/echo")
                    .body(Body::from(r#"{"x":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["output"], json!({"x": 1}));
        assert!(json.get("error").is_none());
        assert_eq!(json["toolName"], "echo");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_calls() {
        let state = AppState::new(DEFAULT_CALL_TIMEOUT);
        let (conn, _rx) = state.hub.connect();
        state.hub.register(conn, "s1", None).unwrap();
        let app = router(state.clone());

        let request = tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/s1/tools/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        });
        while state.broker.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        state.shutdown.cancel();

        let response = request.await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.broker.pending_count(), 0);
    }
}
