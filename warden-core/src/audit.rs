//! Audit events and sinks
//!
//! Every issuance, verification, revocation, and policy decision produces an
//! append-only audit record carrying the task and lineage references needed
//! to reconstruct a full delegation chain post hoc. The core only ever
//! writes audit records; it never reads them back during request processing.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Kind of audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A token was issued (any grant flow)
    TokenIssued,

    /// A refresh token was rotated into a new token
    TokenRefreshed,

    /// An authorization code was issued
    CodeIssued,

    /// An authorization code was exchanged
    CodeExchanged,

    /// A token was introspected
    TokenIntrospected,

    /// A token was revoked
    TokenRevoked,

    /// A token's lineage was verified
    TokenVerified,

    /// The policy evaluator produced a decision
    PolicyDecision,

    /// A delegation grant was created
    GrantCreated,

    /// A delegation grant was revoked
    GrantRevoked,

    /// An agent was registered
    AgentRegistered,

    /// An agent was activated
    AgentActivated,
}

/// One append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Operation kind
    pub kind: AuditKind,

    /// When the operation happened
    pub at: DateTime<Utc>,

    /// Acting agent's client id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Token the operation concerned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,

    /// Lineage parent of the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_token_id: Option<Uuid>,

    /// Task correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Parent task correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,

    /// Delegation grant involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<Uuid>,

    /// Scope involved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,

    /// Policy decision (`allow`/`deny`), when one was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Free-form reason (revocation cause, matched policy, failure detail)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Start an event of the given kind, stamped now
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
            client_id: None,
            token_id: None,
            parent_token_id: None,
            task_id: None,
            parent_task_id: None,
            grant_id: None,
            scope: vec![],
            decision: None,
            reason: None,
        }
    }

    /// Attach the acting client
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Attach the token id
    pub fn token(mut self, token_id: Uuid) -> Self {
        self.token_id = Some(token_id);
        self
    }

    /// Attach the reason
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Accepts append-only audit records
///
/// `record` returns once the event is durably queued; it must never block
/// on the transport behind it. A token decision is only reported successful
/// after `record` returns `Ok`.
pub trait AuditSink: Send + Sync {
    /// Durably queue one event
    fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Emits audit records as structured `tracing` events
///
/// The default sink: the tracing pipeline is the transport, and its
/// subscriber configuration decides where records land.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "warden::audit",
            kind = ?event.kind,
            client_id = event.client_id.as_deref().unwrap_or("-"),
            token_id = %event.token_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            parent_token_id = %event.parent_token_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            task_id = event.task_id.as_deref().unwrap_or("-"),
            grant_id = %event.grant_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            scope = event.scope.join(" "),
            decision = event.decision.as_deref().unwrap_or("-"),
            reason = event.reason.as_deref().unwrap_or("-"),
            "audit"
        );
        Ok(())
    }
}

/// Captures events in memory; test use only
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Count of events with the given kind
    pub fn count(&self, kind: AuditKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}

/// Decouples the hot path from a slow or unavailable downstream sink
///
/// `record` enqueues and returns; a spawned forwarder drains the queue into
/// the inner sink. When the inner sink fails, the event falls back to the
/// tracing pipeline so it is never silently dropped.
pub struct QueuedAuditSink {
    tx: tokio::sync::mpsc::UnboundedSender<AuditEvent>,
}

impl QueuedAuditSink {
    /// Wrap an inner sink, spawning the forwarder on the current runtime
    pub fn spawn(inner: std::sync::Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<AuditEvent>();

        tokio::spawn(async move {
            let fallback = TracingAuditSink;
            while let Some(event) = rx.recv().await {
                if let Err(err) = inner.record(event.clone()) {
                    tracing::warn!(error = %err, "audit sink failed, falling back to log");
                    let _ = fallback.record(event);
                }
            }
        });

        Self { tx }
    }
}

impl AuditSink for QueuedAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| AuthError::Storage("audit queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_sink_captures() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditKind::TokenIssued).client("agent-1"))
            .unwrap();
        sink.record(AuditEvent::new(AuditKind::TokenRevoked)).unwrap();

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(AuditKind::TokenIssued), 1);
        assert_eq!(sink.events()[0].client_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_queued_sink_forwards() {
        let inner = Arc::new(MemoryAuditSink::new());
        let queued = QueuedAuditSink::spawn(inner.clone());

        queued
            .record(AuditEvent::new(AuditKind::TokenIssued))
            .unwrap();

        // Yield until the forwarder drains the queue
        for _ in 0..100 {
            if inner.count(AuditKind::TokenIssued) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(inner.count(AuditKind::TokenIssued), 1);
    }
}
