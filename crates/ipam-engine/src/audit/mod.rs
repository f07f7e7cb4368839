//! Audit trail of mutating operations
//!
//! Every committed subnet or IP mutation produces an `AuditEntry` carrying
//! the actor, the action, the target record and JSON snapshots of the record
//! before and after. Entries are handed to an `AuditSink`:
//!
//! | Sink | Use |
//! |------|-----|
//! | `InMemoryAuditLog` | Tests and embedding, entries kept in order |
//! | `TracingAuditSink` | One `tracing` event per entry |
//! | `BroadcastAuditSink` | Live subscribers over a tokio broadcast channel |
//! | `FanoutAuditSink` | Several of the above |

mod entry;
mod sink;

pub use entry::{AuditAction, AuditEntry, AuditTarget};
pub use sink::{
    AuditSink, BroadcastAuditSink, FanoutAuditSink, InMemoryAuditLog, NoopAuditSink,
    TracingAuditSink,
};
