//! The runtime's logging contract: a typed event stream external sinks subscribe to.
//!
//! A `tokio::sync::broadcast` channel wrapped in a small bus type with
//! best-effort publish semantics and a shutdown signal. No metrics or
//! backpressure machinery: a single run emits at most a few hundred events
//! and has exactly one natural subscriber, the host's sink.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::utils::{redact_secrets, safe_truncate_chars, CAPTURE_SNIPPET_BYTES};

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OnceAlreadyExecuted,
    ConditionMet,
}

/// One event in the run's logging contract.
///
/// Redaction is enforced at construction time via [`RunEvent::error`] /
/// [`RunEvent::step_finished`] helpers rather than trusted to call sites: no
/// variant stores secret values, full request headers, or response bodies
/// larger than [`CAPTURE_SNIPPET_BYTES`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { run_id: Uuid, pack_id: String },
    StepStarted { run_id: Uuid, step_id: String, kind: String },
    StepFinished { run_id: Uuid, step_id: String, duration_ms: u64 },
    StepSkipped { run_id: Uuid, step_id: String, reason: SkipReason, restored_keys: Vec<String> },
    AuthFailureDetected { run_id: Uuid, step_id: String },
    AuthRecoveryStarted { run_id: Uuid },
    AuthRecoveryFinished { run_id: Uuid, success: bool },
    AuthRecoveryExhausted { run_id: Uuid, step_id: String },
    RunFinished { run_id: Uuid, success: bool, duration_ms: u64 },
    Error { run_id: Uuid, step_id: Option<String>, message: String },
}

impl RunEvent {
    /// Build an `Error` event with any known secret values and oversized
    /// payloads scrubbed from `message`.
    #[must_use]
    pub fn error(run_id: Uuid, step_id: Option<String>, message: &str, secrets: &[&str]) -> Self {
        let redacted = redact_secrets(message, secrets);
        let truncated = safe_truncate_chars(&redacted, CAPTURE_SNIPPET_BYTES).to_string();
        Self::Error { run_id, step_id, message: truncated }
    }
}

/// Error conditions from publishing to or subscribing on the bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("no active subscribers")]
    NoSubscribers,
    #[error("event bus is shut down")]
    Shutdown,
}

/// Broadcast bus for [`RunEvent`]s, one per `run()` invocation.
///
/// Publishing is best-effort: if there are no subscribers the event is simply
/// dropped (mirrors `broadcast::Sender::send`'s semantics) rather than treated
/// as a hard failure, since a host that isn't watching a given run shouldn't
/// stall it.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<RunEvent>>,
}

impl EventBus {
    /// Create a bus with the given broadcast channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to this bus's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunEvent>> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns `Ok(n)` with the number of live subscribers
    /// that received it, or `Err(NoSubscribers)` if none were listening.
    pub fn publish(&self, event: RunEvent) -> Result<usize, EventBusError> {
        self.sender
            .send(Arc::new(event))
            .map_err(|_| EventBusError::NoSubscribers)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_reports_no_subscribers() {
        let bus = EventBus::new(16);
        let result = bus.publish(RunEvent::RunStarted {
            run_id: Uuid::nil(),
            pack_id: "demo".into(),
        });
        assert!(matches!(result, Err(EventBusError::NoSubscribers)));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::RunStarted {
            run_id: Uuid::nil(),
            pack_id: "demo".into(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), RunEvent::RunStarted { .. }));
    }

    #[test]
    fn error_event_redacts_and_truncates() {
        let event = RunEvent::error(Uuid::nil(), None, "token sk-secret leaked", &["sk-secret"]);
        if let RunEvent::Error { message, .. } = event {
            assert!(!message.contains("sk-secret"));
        } else {
            panic!("expected Error variant");
        }
    }
}
