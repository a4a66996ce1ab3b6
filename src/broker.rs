//! Orchestrator-side correlation of remote tool calls.
//!
//! [`InvocationBroker::call`] publishes a [`CallEnvelope`] to a session group
//! and parks the caller on a oneshot slot keyed by `call_id`.
//! [`InvocationBroker::resolve`] is driven by the hub's inbound handler and
//! completes that slot when the matching [`ResultEnvelope`] arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::envelope::{CallEnvelope, ResultEnvelope, ToolOutcome};

/// Push channel the broker publishes calls on.
///
/// Publishing must not block: implementations enqueue and return. Publishing
/// to a group with no members is not an error.
pub trait Channel: Send + Sync {
    fn publish(&self, group: &str, call: &CallEnvelope) -> Result<(), ChannelError>;
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("outbound queue for connection {0} is full")]
    Full(String),

    #[error("connection {0} is closed")]
    Closed(String),
}

/// Broker-local failures of a call. Remote failures are not errors here;
/// they come back as an ordinary [`ResultEnvelope`] with `error` set.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("duplicate tool call id: {0}")]
    Duplicate(String),

    #[error("failed to deliver tool call {call_id}: {source}")]
    Delivery {
        call_id: String,
        #[source]
        source: ChannelError,
    },

    #[error("tool call {call_id} timed out after {timeout:?}")]
    Timeout { call_id: String, timeout: Duration },

    #[error("tool call {0} was cancelled")]
    Cancelled(String),
}

struct PendingSlot {
    seq: u64,
    tx: oneshot::Sender<ResultEnvelope>,
}

/// Table of in-flight calls keyed by call id.
///
/// Constructed by the owner and handed to [`InvocationBroker::new`]; clones
/// share the same table.
#[derive(Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<HashMap<String, PendingSlot>>>,
    next_seq: Arc<AtomicU64>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.lock().contains_key(call_id)
    }

    fn register(
        &self,
        call_id: &str,
        tx: oneshot::Sender<ResultEnvelope>,
    ) -> Result<PendingGuard, CallError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(call_id) {
            return Err(CallError::Duplicate(call_id.to_string()));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        inner.insert(call_id.to_string(), PendingSlot { seq, tx });
        Ok(PendingGuard {
            pending: self.clone(),
            call_id: call_id.to_string(),
            seq,
        })
    }

    fn take(&self, call_id: &str) -> Option<oneshot::Sender<ResultEnvelope>> {
        self.inner.lock().remove(call_id).map(|slot| slot.tx)
    }
}

/// Removes a pending record when the owning `call` exits by any path,
/// including its future being dropped.
///
/// Only the record this guard registered is removed: if the id was resolved
/// and then reused by a newer call, the newer record is left alone.
struct PendingGuard {
    pending: PendingCalls,
    call_id: String,
    seq: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut inner = self.pending.inner.lock();
        if inner.get(&self.call_id).is_some_and(|slot| slot.seq == self.seq) {
            inner.remove(&self.call_id);
        }
    }
}

/// Issues calls over a [`Channel`] and matches results back to callers.
#[derive(Clone)]
pub struct InvocationBroker {
    channel: Arc<dyn Channel>,
    pending: PendingCalls,
}

impl InvocationBroker {
    pub fn new(channel: Arc<dyn Channel>, pending: PendingCalls) -> Self {
        Self { channel, pending }
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Publish `envelope` and wait for its result.
    ///
    /// The pending record is registered before publishing so a fast reply
    /// cannot arrive ahead of it.
    pub async fn call(
        &self,
        envelope: CallEnvelope,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, CallError> {
        let call_id = envelope.call_id.clone();
        let (tx, rx) = oneshot::channel();
        let _guard = self.pending.register(&call_id, tx)?;

        if let Err(source) = self.channel.publish(&envelope.session_id, &envelope) {
            tracing::warn!(
                session_id = %envelope.session_id,
                call_id = %call_id,
                error = %source,
                "failed to publish tool call"
            );
            return Err(CallError::Delivery { call_id, source });
        }

        tracing::debug!(
            session_id = %envelope.session_id,
            call_id = %call_id,
            tool = %envelope.name,
            "tool call published"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled(call_id)),
            result = tokio::time::timeout(timeout, rx) => match result {
                Ok(Ok(result)) => Ok(result),
                // Sender dropped without a result: the record was torn down
                // from outside, which only happens when the table is dropped.
                Ok(Err(_)) => Err(CallError::Cancelled(call_id)),
                Err(_) => {
                    tracing::info!(
                        session_id = %envelope.session_id,
                        call_id = %call_id,
                        tool = %envelope.name,
                        ?timeout,
                        "tool call timed out"
                    );
                    Err(CallError::Timeout { call_id, timeout })
                }
            },
        }
    }

    /// Hand `result` to the caller waiting on `call_id`, if any.
    ///
    /// Unknown, late and duplicate results are dropped. Returns whether a
    /// waiting caller received the result.
    pub fn resolve(&self, call_id: &str, result: ResultEnvelope) -> bool {
        match self.pending.take(call_id) {
            Some(tx) => {
                // The receiver may have been dropped between our lookup and
                // now; that is equivalent to a late result.
                tx.send(result).is_ok()
            }
            None => {
                tracing::debug!(call_id = %call_id, "discarding result with no pending call");
                false
            }
        }
    }

    /// Mint a call id, run the call and collapse the reply into a
    /// [`ToolOutcome`].
    pub async fn invoke(
        &self,
        session_id: &str,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolOutcome, CallError> {
        let envelope = CallEnvelope::new(session_id, name, arguments);
        let result = self
            .call(envelope, timeout, &CancellationToken::new())
            .await?;
        Ok(result.into_outcome())
    }
}
