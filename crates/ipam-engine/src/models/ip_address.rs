//! IP address records and their lifecycle

use super::subnet::{ActorId, SubnetId};
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP address record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpId(pub u64);

impl fmt::Display for IpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device identifier (weak reference, devices live outside the engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an IP address record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpStatus {
    /// Recorded but not assigned to a device
    Free,
    /// Assigned to a device
    Assigned,
    /// Held administratively
    Reserved,
    /// Taken out of service pending conflict resolution
    Quarantined,
}

impl IpStatus {
    /// Check if the allocation/resolution flows may move a record from
    /// `self` to `next`
    ///
    /// `Reserved` is administrative: it is only entered or left through a
    /// direct update.
    pub fn can_transition_to(&self, next: IpStatus) -> bool {
        use IpStatus::*;
        matches!(
            (self, next),
            (Free, Assigned)
                | (Free, Free)
                | (Assigned, Free)
                | (Assigned, Assigned)
                | (Assigned, Quarantined)
                | (Quarantined, Assigned)
                | (Quarantined, Free)
                | (Quarantined, Quarantined)
        )
    }

    /// Counted as used by utilization statistics
    pub fn is_used(&self) -> bool {
        matches!(self, IpStatus::Assigned | IpStatus::Reserved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IpStatus::Free => "free",
            IpStatus::Assigned => "assigned",
            IpStatus::Reserved => "reserved",
            IpStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for IpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(IpStatus::Free),
            "assigned" => Ok(IpStatus::Assigned),
            "reserved" => Ok(IpStatus::Reserved),
            "quarantined" => Ok(IpStatus::Quarantined),
            other => Err(Error::InvalidArgument(format!("unknown IP status '{}'", other))),
        }
    }
}

/// Per-status row counters for one subnet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub free: usize,
    pub assigned: usize,
    pub reserved: usize,
    pub quarantined: usize,
}

impl StatusCounts {
    pub fn increment(&mut self, status: IpStatus) {
        *self.slot(status) += 1;
    }

    pub fn decrement(&mut self, status: IpStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    /// Move one row between counters
    pub fn transition(&mut self, from: IpStatus, to: IpStatus) {
        if from != to {
            self.decrement(from);
            self.increment(to);
        }
    }

    /// Rows counted as used (ASSIGNED or RESERVED)
    pub fn used(&self) -> usize {
        self.assigned + self.reserved
    }

    pub fn total(&self) -> usize {
        self.free + self.assigned + self.reserved + self.quarantined
    }

    fn slot(&mut self, status: IpStatus) -> &mut usize {
        match status {
            IpStatus::Free => &mut self.free,
            IpStatus::Assigned => &mut self.assigned,
            IpStatus::Reserved => &mut self.reserved,
            IpStatus::Quarantined => &mut self.quarantined,
        }
    }
}

/// A single host address recorded in the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddressRecord {
    /// Record ID
    pub id: IpId,
    /// Host address, globally unique
    pub address: IpAddr,
    /// Owning subnet
    pub subnet_id: SubnetId,
    /// Lifecycle status
    pub status: IpStatus,
    /// Device holding the address
    pub assigned_to_id: Option<DeviceId>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub interface: Option<String>,
    pub lease_expires: Option<DateTime<Utc>>,
    /// Last time the scanner saw the address alive
    pub last_seen: Option<DateTime<Utc>>,
    /// Free-form metadata (scan status etc.)
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IpAddressRecord {
    /// Create a FREE record; the store assigns the final id
    pub fn new(address: IpAddr, subnet_id: SubnetId) -> Self {
        let now = Utc::now();
        Self {
            id: IpId(0),
            address,
            subnet_id,
            status: IpStatus::Free,
            assigned_to_id: None,
            hostname: None,
            mac_address: None,
            interface: None,
            lease_expires: None,
            last_seen: None,
            metadata: BTreeMap::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Conflict resolution action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Unassign the address (the row stays, status FREE)
    Release,
    /// Hand the address to another device
    Reassign,
    /// Take the address out of service
    Quarantine,
}

impl ConflictAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictAction::Release => "release",
            ConflictAction::Reassign => "reassign",
            ConflictAction::Quarantine => "quarantine",
        }
    }
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(ConflictAction::Release),
            "reassign" => Ok(ConflictAction::Reassign),
            "quarantine" => Ok(ConflictAction::Quarantine),
            other => Err(Error::InvalidArgument(format!(
                "unknown conflict action '{}'",
                other
            ))),
        }
    }
}
