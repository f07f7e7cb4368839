//! Audit entry types

use crate::models::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of record an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTarget {
    Subnet,
    IpAddress,
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditTarget::Subnet => f.write_str("subnet"),
            AuditTarget::IpAddress => f.write_str("ip_address"),
        }
    }
}

/// Mutating operation that produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // ========================================================================
    // Subnet lifecycle
    // ========================================================================
    SubnetCreated,
    SubnetUpdated,
    SubnetDeleted,

    // ========================================================================
    // IP lifecycle
    // ========================================================================
    /// Row created by first-fit allocation
    IpAllocated,
    /// Row created at an explicit address
    IpCreated,
    IpAssigned,
    IpUpdated,
    IpDeleted,
    ConflictResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SubnetCreated => "subnet_created",
            AuditAction::SubnetUpdated => "subnet_updated",
            AuditAction::SubnetDeleted => "subnet_deleted",
            AuditAction::IpAllocated => "ip_allocated",
            AuditAction::IpCreated => "ip_created",
            AuditAction::IpAssigned => "ip_assigned",
            AuditAction::IpUpdated => "ip_updated",
            AuditAction::IpDeleted => "ip_deleted",
            AuditAction::ConflictResolved => "conflict_resolved",
        }
    }

    pub fn target(&self) -> AuditTarget {
        match self {
            AuditAction::SubnetCreated | AuditAction::SubnetUpdated | AuditAction::SubnetDeleted => {
                AuditTarget::Subnet
            }
            _ => AuditTarget::IpAddress,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry ID
    pub id: Uuid,
    /// When the mutation was committed
    pub at: DateTime<Utc>,
    /// Who performed it, `None` for system operations
    pub actor: Option<ActorId>,
    pub action: AuditAction,
    pub target: AuditTarget,
    /// Subnet or IP record id
    pub target_id: u64,
    /// Snapshot before the change
    pub before: Option<serde_json::Value>,
    /// Snapshot after the change
    pub after: Option<serde_json::Value>,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, target_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            actor: None,
            action,
            target: action.target(),
            target_id,
            before: None,
            after: None,
            detail: None,
        }
    }

    pub fn actor(mut self, actor: Option<ActorId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = snapshot(value);
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = snapshot(value);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to snapshot audit value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IpAddressRecord, SubnetId};

    #[test]
    fn test_entry_builder() {
        let record = IpAddressRecord::new("10.0.0.5".parse().unwrap(), SubnetId(1));
        let entry = AuditEntry::new(AuditAction::IpAllocated, 9)
            .actor(Some(ActorId(3)))
            .after(&record)
            .detail("first-fit");

        assert_eq!(entry.target, AuditTarget::IpAddress);
        assert_eq!(entry.actor, Some(ActorId(3)));
        assert!(entry.before.is_none());
        assert_eq!(entry.after.as_ref().unwrap()["address"], "10.0.0.5");
        assert_eq!(entry.detail.as_deref(), Some("first-fit"));
    }

    #[test]
    fn test_action_targets() {
        assert_eq!(AuditAction::SubnetDeleted.target(), AuditTarget::Subnet);
        assert_eq!(AuditAction::ConflictResolved.target(), AuditTarget::IpAddress);
        assert_eq!(AuditAction::IpAssigned.to_string(), "ip_assigned");
    }
}
