//! Connection and session-group table behind the `/toolhub` WebSocket.
//!
//! Each WebSocket connection gets a bounded outbound queue. A session group
//! has at most one member: when a second connection registers for a session,
//! the earlier one is dropped from the group and notified with
//! [`ServerMessage::Superseded`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::{Channel, ChannelError};
use crate::envelope::{CallEnvelope, ServerMessage};

/// Outbound frames buffered per connection before publishes start failing.
pub const OUTBOUND_CAPACITY: usize = 256;

pub type ConnectionId = Uuid;

struct ConnectionEntry {
    tx: mpsc::Sender<ServerMessage>,
    session_id: Option<String>,
    kernel_id: Option<String>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    sessions: HashMap<String, ConnectionId>,
}

/// A registered session as reported by `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub kernel_id: Option<String>,
    pub connection_id: ConnectionId,
}

#[derive(Clone, Default)]
pub struct ToolHub {
    inner: Arc<RwLock<HubInner>>,
}

impl ToolHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Frames for it arrive on the returned receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = Uuid::new_v4();
        self.inner.write().connections.insert(
            id,
            ConnectionEntry {
                tx,
                session_id: None,
                kernel_id: None,
            },
        );
        tracing::debug!(connection_id = %id, "dispatcher connected");
        (id, rx)
    }

    /// Put `conn` in the group for `session_id` and acknowledge it.
    ///
    /// Returns the connection that previously owned the session, if it was a
    /// different one. A connection re-registering under a new session leaves
    /// its old group. If the acknowledgement cannot be queued nothing changes.
    pub fn register(
        &self,
        conn: ConnectionId,
        session_id: &str,
        kernel_id: Option<String>,
    ) -> Result<Option<ConnectionId>, ChannelError> {
        let mut inner = self.inner.write();

        let tx = match inner.connections.get(&conn) {
            Some(entry) => entry.tx.clone(),
            None => return Err(ChannelError::Closed(conn.to_string())),
        };
        let ack = tx.try_reserve().map_err(|e| queue_error(conn, e))?;

        let previous_session = match inner.connections.get_mut(&conn) {
            Some(entry) => {
                entry.kernel_id = kernel_id.clone();
                entry.session_id.replace(session_id.to_string())
            }
            None => return Err(ChannelError::Closed(conn.to_string())),
        };
        if let Some(old) = previous_session.filter(|old| old != session_id) {
            if inner.sessions.get(&old) == Some(&conn) {
                inner.sessions.remove(&old);
            }
        }

        let displaced = inner
            .sessions
            .insert(session_id.to_string(), conn)
            .filter(|prev| *prev != conn);

        if let Some(prev) = displaced {
            if let Some(entry) = inner.connections.get_mut(&prev) {
                entry.session_id = None;
                let notice = ServerMessage::Superseded {
                    session_id: session_id.to_string(),
                };
                if let Err(e) = send_frame(prev, &entry.tx, notice) {
                    tracing::warn!(
                        session_id = %session_id,
                        connection_id = %prev,
                        error = %e,
                        "could not notify displaced connection"
                    );
                }
            }
            tracing::warn!(
                session_id = %session_id,
                previous = %prev,
                current = %conn,
                "session taken over by a newer connection"
            );
        }

        ack.send(ServerMessage::Registered {
            session_id: session_id.to_string(),
        });

        tracing::info!(
            session_id = %session_id,
            kernel_id = kernel_id.as_deref().unwrap_or("-"),
            connection_id = %conn,
            "dispatcher registered"
        );
        Ok(displaced)
    }

    /// Forget `conn` and release its session if it still owns it.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.connections.remove(&conn) else {
            return;
        };
        if let Some(session_id) = entry.session_id {
            if inner.sessions.get(&session_id) == Some(&conn) {
                inner.sessions.remove(&session_id);
            }
            tracing::info!(session_id = %session_id, connection_id = %conn, "dispatcher left session");
        } else {
            tracing::debug!(connection_id = %conn, "dispatcher disconnected");
        }
    }

    /// Send a frame to one connection.
    pub fn send_to(&self, conn: ConnectionId, msg: ServerMessage) -> Result<(), ChannelError> {
        let inner = self.inner.read();
        let entry = inner
            .connections
            .get(&conn)
            .ok_or_else(|| ChannelError::Closed(conn.to_string()))?;
        send_frame(conn, &entry.tx, msg)
    }

    /// The connection currently owning `session_id`.
    pub fn member(&self, session_id: &str) -> Option<ConnectionId> {
        self.inner.read().sessions.get(session_id).copied()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let inner = self.inner.read();
        let mut out: Vec<SessionInfo> = inner
            .sessions
            .iter()
            .map(|(session_id, conn)| SessionInfo {
                session_id: session_id.clone(),
                kernel_id: inner
                    .connections
                    .get(conn)
                    .and_then(|entry| entry.kernel_id.clone()),
                connection_id: *conn,
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }
}

fn send_frame(
    conn: ConnectionId,
    tx: &mpsc::Sender<ServerMessage>,
    msg: ServerMessage,
) -> Result<(), ChannelError> {
    tx.try_send(msg).map_err(|e| queue_error(conn, e))
}

fn queue_error<T>(conn: ConnectionId, err: mpsc::error::TrySendError<T>) -> ChannelError {
    match err {
        mpsc::error::TrySendError::Full(_) => ChannelError::Full(conn.to_string()),
        mpsc::error::TrySendError::Closed(_) => ChannelError::Closed(conn.to_string()),
    }
}

impl Channel for ToolHub {
    fn publish(&self, group: &str, call: &CallEnvelope) -> Result<(), ChannelError> {
        let inner = self.inner.read();
        let Some(conn) = inner.sessions.get(group).copied() else {
            tracing::debug!(
                session_id = %group,
                call_id = %call.call_id,
                "no dispatcher in session, tool call dropped"
            );
            return Ok(());
        };
        match inner.connections.get(&conn) {
            Some(entry) => send_frame(conn, &entry.tx, ServerMessage::ToolCall(call.clone())),
            None => Err(ChannelError::Closed(conn.to_string())),
        }
    }
}
