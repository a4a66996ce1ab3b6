use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{CallEnvelope, ClientMessage, ServerMessage};
use crate::hub::{ConnectionId, SessionInfo};

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    pending_calls: usize,
    sessions: usize,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pending_calls: state.broker.pending_count(),
        sessions: state.hub.sessions().len(),
    })
}

pub(super) async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.hub.sessions())
}

#[derive(Debug, Deserialize)]
pub(super) struct InvokeQuery {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InvokeResponse {
    call_id: String,
    tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run a tool on the client registered for `session_id`.
///
/// The request body is the arguments payload; an empty body means `{}`.
pub(super) async fn invoke_tool(
    State(state): State<AppState>,
    Path((session_id, name)): Path<(String, String)>,
    Query(query): Query<InvokeQuery>,
    body: Bytes,
) -> Result<Json<InvokeResponse>, ApiError> {
    let arguments: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("arguments must be JSON: {}", e)))?
    };
    let timeout = match query.timeout_ms {
        Some(0) => return Err(ApiError::InvalidRequest("timeout_ms must be positive".into())),
        Some(ms) => Duration::from_millis(ms),
        None => state.call_timeout,
    };

    let envelope = CallEnvelope::new(session_id, name, arguments);
    // Dropping this future (client hung up) releases the pending call too.
    let result = state
        .broker
        .call(envelope, timeout, &state.shutdown)
        .await?;

    Ok(Json(InvokeResponse {
        call_id: result.call_id,
        tool_name: result.tool_name,
        output: if result.error.is_none() {
            Some(result.output_payload.unwrap_or(Value::Null))
        } else {
            None
        },
        error: result.error,
    }))
}

pub(super) async fn toolhub_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_toolhub_ws(socket, state))
}

/// Serve one dispatcher connection.
///
/// Outbound frames are written by a separate task so that resolving results
/// in the read loop never waits on socket writes.
async fn handle_toolhub_ws(socket: WebSocket, state: AppState) {
    let (conn, mut outbound) = state.hub.connect();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode hub frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_client_frame(&state, conn, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %conn, error = %e, "websocket error");
                        break;
                    }
                }
            }
            _ = state.shutdown.cancelled() => {
                tracing::debug!(connection_id = %conn, "closing dispatcher connection for shutdown");
                break;
            }
        }
    }

    // Dropping the hub entry closes `outbound`, which ends the writer.
    state.hub.disconnect(conn);
    let _ = writer.await;
}

fn handle_client_frame(state: &AppState, conn: ConnectionId, text: &str) {
    let frame: ClientMessage = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection_id = %conn, error = %e, "malformed frame from dispatcher");
            let _ = state.hub.send_to(
                conn,
                ServerMessage::Error {
                    code: "invalid_frame".into(),
                    message: e.to_string(),
                },
            );
            return;
        }
    };

    match frame {
        ClientMessage::Register { session_id, kernel_id } => {
            if let Err(e) = state.hub.register(conn, &session_id, kernel_id) {
                tracing::warn!(connection_id = %conn, session_id = %session_id, error = %e, "registration failed");
            }
        }
        ClientMessage::ToolResult(result) => {
            let call_id = result.call_id.clone();
            let failed = result.is_error();
            if state.broker.resolve(&call_id, result) {
                tracing::debug!(call_id = %call_id, failed, "tool call resolved");
            }
        }
        ClientMessage::ToolProgress {
            session_id,
            call_id,
            name,
            progress,
        } => {
            tracing::info!(
                session_id = %session_id,
                call_id = %call_id,
                tool = %name,
                progress = %progress,
                "tool progress"
            );
        }
    }
}
