//! Audit events for authorization decisions and identity changes
//!
//! Emission is best-effort and never blocks: a sink failure is logged and dropped,
//! it never fails the decision or mutation that produced the event.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PolicyMode;
use crate::error::{AuthzError, Result};
use crate::mutation::IdentityMutation;
use crate::types::{NodeId, PrincipalId};

/// Audit event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A permission check or mutation precondition was refused
    PermissionDenied {
        principal: PrincipalId,
        permission: String,
        node: Option<NodeId>,
    },

    /// Role assignments of `target` changed
    RoleChanged {
        actor: PrincipalId,
        target: PrincipalId,
        mutation: IdentityMutation,
    },

    /// Overrides of `target` changed
    OverrideChanged {
        actor: PrincipalId,
        target: PrincipalId,
        mutation: IdentityMutation,
    },

    /// `target` was deleted
    PrincipalDeleted {
        actor: PrincipalId,
        target: PrincipalId,
    },

    /// A safety guardrail rejected a mutation
    SafetyRejected {
        actor: PrincipalId,
        target: PrincipalId,
        action: String,
        reason: String,
    },

    /// Directory read failed in strict mode (alert)
    PermissionSourceUnavailable {
        principal: PrincipalId,
        mode: PolicyMode,
        error: String,
    },
}

impl AuditEvent {
    /// Principal the event is primarily about
    pub fn subject(&self) -> &PrincipalId {
        match self {
            AuditEvent::PermissionDenied { principal, .. }
            | AuditEvent::PermissionSourceUnavailable { principal, .. } => principal,
            AuditEvent::RoleChanged { target, .. }
            | AuditEvent::OverrideChanged { target, .. }
            | AuditEvent::PrincipalDeleted { target, .. }
            | AuditEvent::SafetyRejected { target, .. } => target,
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique entry ID
    pub id: Uuid,

    /// Emission time
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Destination for audit records; implementations must not block
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord) -> Result<()>;
}

/// Front for a sink that swallows and logs emission failures
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Logger writing to `tracing` only
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }

    /// Emit an event; failures are logged, never returned
    pub fn log(&self, event: AuditEvent) {
        let record = AuditRecord::new(event);
        if let Err(e) = self.sink.emit(&record) {
            warn!("Audit emission failed for record {}: {}", record.id, e);
        }
    }
}

/// Writes each record as a structured `tracing` event on the `audit` target
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| AuthzError::Internal(format!("Failed to serialize audit record: {}", e)))?;
        info!(target: "audit", record = %json, "audit event");
        Ok(())
    }
}

/// Bounded in-memory buffer (keeps the most recent records)
pub struct InMemoryAuditSink {
    buffer: Mutex<VecDeque<AuditRecord>>,
    max_records: usize,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Snapshot of all buffered records, oldest first
    pub fn records(&self) -> Vec<AuditRecord> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Most recent records about `principal`, newest first
    pub fn query_by_principal(&self, principal: &PrincipalId, limit: usize) -> Vec<AuditRecord> {
        self.buffer
            .lock()
            .iter()
            .rev()
            .filter(|r| r.event.subject() == principal)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, record: &AuditRecord) -> Result<()> {
        let mut buffer = self.buffer.lock();
        buffer.push_back(record.clone());
        while buffer.len() > self.max_records {
            buffer.pop_front();
        }
        Ok(())
    }
}

/// Forwards records to a consumer task over a bounded channel
///
/// A full or closed channel drops the record with an error rather than waiting.
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditRecord>,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, record: &AuditRecord) -> Result<()> {
        self.sender
            .try_send(record.clone())
            .map_err(|e| AuthzError::Internal(format!("Audit channel rejected record: {}", e)))
    }
}
