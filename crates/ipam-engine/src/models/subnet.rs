//! Subnet and related models

use super::range::{host_range, AddressCount, AddressFamily, AddressRange};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Subnet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubnetId(pub u64);

impl fmt::Display for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user or service performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A CIDR block tracked by the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    /// Unique subnet identifier
    pub id: SubnetId,
    /// CIDR block, immutable after creation
    pub cidr: IpNet,
    /// Declared parent (back-reference only)
    pub parent_id: Option<SubnetId>,
    /// Ranges never handed out by allocation, sorted and merged
    pub reserved_ranges: Vec<AddressRange>,
    /// VLAN tag
    pub vlan_id: Option<u32>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Description
    pub description: Option<String>,
    /// Physical or logical location
    pub location: Option<String>,
    /// Created by user/system
    pub created_by: Option<ActorId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Subnet {
    /// Create a subnet record; the forest assigns the final id on insert
    pub fn new(cidr: IpNet) -> Self {
        let now = Utc::now();
        Self {
            id: SubnetId(0),
            cidr,
            parent_id: None,
            reserved_ranges: Vec::new(),
            vlan_id: None,
            tags: Vec::new(),
            description: None,
            location: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of_net(&self.cidr)
    }

    /// Full block `[network, broadcast]`
    pub fn block_range(&self) -> AddressRange {
        AddressRange::from_net(&self.cidr)
    }

    /// Assignable host addresses, `None` for /31, /32, /127 and /128
    pub fn host_range(&self) -> Option<AddressRange> {
        host_range(&self.cidr)
    }

    /// Check if an IP is within this subnet's block
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.cidr.contains(&ip)
    }

    /// Check if an IP falls inside one of the reserved ranges
    pub fn is_reserved(&self, ip: IpAddr) -> bool {
        self.reserved_ranges.iter().any(|r| r.contains(ip))
    }
}

/// Utilization of a subnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetStats {
    /// Subnet ID
    pub subnet_id: SubnetId,
    /// Host addresses in the block
    pub total: AddressCount,
    /// Rows in ASSIGNED or RESERVED status
    pub used: AddressCount,
    /// `total - used`
    pub free: AddressCount,
    /// Addresses still available to first-fit allocation
    pub allocatable: AddressCount,
    /// `used / total * 100`, rounded to two decimals, 0 for empty blocks
    pub utilization_percent: f64,
    /// Direct children only
    pub children_count: usize,
}
