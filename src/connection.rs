use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::dispatcher::RemoteDispatcher;
use crate::envelope::{ClientMessage, ResultEnvelope, ServerMessage};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Completed results waiting to be written to the hub.
const RESULT_QUEUE_CAPACITY: usize = 64;

/// A persistent WebSocket connection from a dispatcher to the hub.
///
/// Spawns a tokio task that:
/// - Connects to the hub's `/toolhub` URL and sends `register`
/// - Marks the dispatcher registered once the hub acknowledges
/// - Runs a select! loop: incoming tool calls, finished results, ping timer (30s), shutdown
/// - On disconnect: marks the dispatcher unregistered, retries with exponential backoff (1s..60s)
///
/// Results that finish while disconnected are held and sent after the next
/// successful connect.
pub struct DispatcherConnection {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl DispatcherConnection {
    /// Spawn the persistent connection task for `url`.
    pub fn spawn(url: String, dispatcher: Arc<RemoteDispatcher>) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(connection_loop(url, dispatcher, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Signal the connection task to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the connection task to complete. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn connection_loop(
    url: String,
    dispatcher: Arc<RemoteDispatcher>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(60);
    let (results_tx, mut results_rx) = mpsc::channel::<ResultEnvelope>(RESULT_QUEUE_CAPACITY);

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                backoff = Duration::from_secs(1);
                tracing::info!(hub = %url, session_id = %dispatcher.session_id(), "connected to hub");

                run_connection(
                    ws_stream,
                    &dispatcher,
                    &results_tx,
                    &mut results_rx,
                    &mut shutdown_rx,
                )
                .await;
                dispatcher.mark_unregistered();

                if *shutdown_rx.borrow() {
                    return;
                }
                tracing::warn!(hub = %url, "disconnected from hub");
            }
            Err(e) => {
                tracing::debug!(hub = %url, error = %e, "connection failed");
            }
        }

        // Wait before retry with exponential backoff.
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => { return; }
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn run_connection(
    ws_stream: WsStream,
    dispatcher: &Arc<RemoteDispatcher>,
    results_tx: &mpsc::Sender<ResultEnvelope>,
    results_rx: &mut mpsc::Receiver<ResultEnvelope>,
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    let register = ClientMessage::Register {
        session_id: dispatcher.session_id().to_string(),
        kernel_id: dispatcher.kernel_id().map(str::to_string),
    };
    match serde_json::to_string(&register) {
        Ok(json) => {
            if sink.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode register frame");
            return;
        }
    }

    let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
    ping_interval.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, dispatcher, results_tx);
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            Some(result) = results_rx.recv() => {
                let call_id = result.call_id.clone();
                let json = match serde_json::to_string(&ClientMessage::ToolResult(result)) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(call_id = %call_id, error = %e, "failed to encode tool result");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    tracing::warn!(call_id = %call_id, "lost tool result on disconnect");
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

fn handle_frame(
    text: &str,
    dispatcher: &Arc<RemoteDispatcher>,
    results_tx: &mpsc::Sender<ResultEnvelope>,
) {
    let frame: ServerMessage = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed frame from hub");
            return;
        }
    };

    match frame {
        ServerMessage::Registered { session_id } => {
            dispatcher.mark_registered(&session_id);
            tracing::info!(session_id = %session_id, "registered with hub");
        }
        ServerMessage::ToolCall(call) => {
            let dispatcher = dispatcher.clone();
            let results_tx = results_tx.clone();
            tokio::spawn(async move {
                if let Some(result) = dispatcher.handle_call(&call).await {
                    let _ = results_tx.send(result).await;
                }
            });
        }
        ServerMessage::Superseded { session_id } => {
            tracing::warn!(session_id = %session_id, "another client took over this session");
            dispatcher.mark_unregistered();
        }
        ServerMessage::Error { code, message } => {
            tracing::warn!(code = %code, message = %message, "hub reported an error");
        }
    }
}
