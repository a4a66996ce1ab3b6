//! Client-side execution of tool calls addressed to one session.

use std::sync::Arc;

use tokio::sync::watch;

use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::registry::CapabilityRegistry;

/// Whether the hub has acknowledged this dispatcher as a session member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered { session_id: String },
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered { .. })
    }
}

pub struct RemoteDispatcher {
    session_id: String,
    kernel_id: Option<String>,
    registry: Arc<CapabilityRegistry>,
    state: watch::Sender<RegistrationState>,
}

impl RemoteDispatcher {
    pub fn new(
        session_id: impl Into<String>,
        kernel_id: Option<String>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            session_id: session_id.into(),
            kernel_id,
            registry,
            state,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel_id.as_deref()
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    /// Record the hub's acknowledgement of `session_id`.
    ///
    /// Acknowledgements for a different session are ignored.
    pub fn mark_registered(&self, session_id: &str) {
        if session_id != self.session_id {
            tracing::warn!(
                expected = %self.session_id,
                got = %session_id,
                "ignoring registration ack for another session"
            );
            return;
        }
        self.state.send_replace(RegistrationState::Registered {
            session_id: session_id.to_string(),
        });
    }

    pub fn mark_unregistered(&self) {
        self.state.send_replace(RegistrationState::Unregistered);
    }

    /// Wait until the dispatcher is a registered session member.
    pub async fn wait_registered(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(RegistrationState::is_registered).await;
    }

    /// Execute `call` and build its reply.
    ///
    /// Returns `None` only when the call is addressed to another session.
    /// Every other path, including unknown names, argument errors, capability
    /// failures and panics, yields exactly one [`ResultEnvelope`].
    pub async fn handle_call(&self, call: &CallEnvelope) -> Option<ResultEnvelope> {
        if call.session_id != self.session_id {
            tracing::debug!(
                session_id = %call.session_id,
                call_id = %call.call_id,
                "ignoring tool call for another session"
            );
            return None;
        }

        let Some(capability) = self.registry.lookup(&call.name) else {
            tracing::warn!(call_id = %call.call_id, tool = %call.name, "unknown capability");
            return Some(ResultEnvelope::failure(
                call,
                format!("unknown capability: {}", call.name),
            ));
        };

        tracing::debug!(call_id = %call.call_id, tool = %call.name, "executing tool call");
        let arguments = call.arguments_payload.clone();
        // Run on its own task so a panicking capability is contained.
        let joined = tokio::spawn(async move { capability.execute(arguments).await }).await;

        let result = match joined {
            Ok(Ok(output)) => ResultEnvelope::success(call, output),
            Ok(Err(e)) => {
                tracing::info!(call_id = %call.call_id, tool = %call.name, error = %e, "tool call failed");
                ResultEnvelope::failure(call, e.to_string())
            }
            Err(e) => {
                tracing::error!(call_id = %call.call_id, tool = %call.name, error = %e, "capability task failed");
                ResultEnvelope::failure(call, format!("capability {} aborted: {}", call.name, e))
            }
        };
        Some(result)
    }
}
