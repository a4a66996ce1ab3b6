//! Call and result envelopes exchanged between the hub and dispatchers,
//! plus the tagged frames that carry them over the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to run a named capability on whichever client owns `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub session_id: String,
    /// Correlation token, unique among in-flight calls.
    pub call_id: String,
    pub name: String,
    /// Opaque to the broker; the capability owns its schema.
    #[serde(default)]
    pub arguments_payload: Value,
}

impl CallEnvelope {
    /// Build an envelope with a freshly minted random call id.
    pub fn new(session_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments_payload: arguments,
        }
    }
}

/// The single reply produced for a [`CallEnvelope`].
///
/// Exactly one of `output_payload` and `error` is present. Use the
/// constructors rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    pub fn success(call: &CallEnvelope, output: Value) -> Self {
        Self {
            session_id: call.session_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            output_payload: Some(output),
            error: None,
        }
    }

    pub fn failure(call: &CallEnvelope, error: impl Into<String>) -> Self {
        Self {
            session_id: call.session_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            output_payload: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Collapse into the caller-facing outcome.
    ///
    /// A success envelope with no payload is treated as `null` output.
    pub fn into_outcome(self) -> ToolOutcome {
        match self.error {
            Some(error) => ToolOutcome::Failed(error),
            None => ToolOutcome::Output(self.output_payload.unwrap_or(Value::Null)),
        }
    }
}

/// What an orchestrator sees after a call was delivered and answered.
///
/// Remote failures land here as `Failed`; transport and broker failures are
/// reported separately as [`crate::broker::CallError`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Output(Value),
    Failed(String),
}

/// Frames sent by a dispatcher to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join a session. `kernel_id` is informational metadata for operators.
    #[serde(rename_all = "camelCase")]
    Register {
        session_id: String,
        #[serde(default)]
        kernel_id: Option<String>,
    },
    ToolResult(ResultEnvelope),
    #[serde(rename_all = "camelCase")]
    ToolProgress {
        session_id: String,
        call_id: String,
        name: String,
        #[serde(default)]
        progress: Value,
    },
}

/// Frames sent by the hub to a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Registered { session_id: String },
    ToolCall(CallEnvelope),
    /// Another connection registered for the same session and took it over.
    #[serde(rename_all = "camelCase")]
    Superseded { session_id: String },
    Error { code: String, message: String },
}
