//! Audit sinks
//!
//! Sinks are fire-and-forget: recording never fails the operation that
//! produced the entry.

use super::{AuditEntry, AuditTarget};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Receiver of audit entries
pub trait AuditSink: Send + Sync {
    /// Record one entry
    fn record(&self, entry: AuditEntry);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: AuditEntry) {}
}

/// In-memory audit log (for testing and embedding)
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Entries about one record
    pub fn entries_for(&self, target: AuditTarget, target_id: u64) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.target == target && e.target_id == target_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

/// Sink that emits each entry as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            audit_id = %entry.id,
            action = %entry.action,
            target = %entry.target,
            target_id = entry.target_id,
            actor = ?entry.actor,
            detail = entry.detail.as_deref().unwrap_or(""),
            "Audit"
        );
    }
}

/// Sink that publishes entries on a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastAuditSink {
    tx: broadcast::Sender<AuditEntry>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to entries recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl AuditSink for BroadcastAuditSink {
    fn record(&self, entry: AuditEntry) {
        // No subscribers is not an error
        if self.tx.send(entry).is_err() {
            tracing::trace!("Audit entry dropped, no subscribers");
        }
    }
}

/// Sink forwarding to several others
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(entry.clone());
            }
            last.record(entry);
        }
    }
}
