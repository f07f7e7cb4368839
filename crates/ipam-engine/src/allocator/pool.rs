//! Per-subnet allocation state
//!
//! A `SubnetPool` is the unit guarded by a subnet's lock: the free-space
//! index, the ids of the rows the subnet owns and their per-status counters.
//! Keeping them together means record creation and exclusion commit under
//! one critical section.

use super::FreeSpaceIndex;
use crate::models::{AddressRange, IpId, IpStatus, StatusCounts, Subnet};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Lockable allocation state of one subnet
#[derive(Debug, Clone)]
pub struct SubnetPool {
    index: FreeSpaceIndex,
    counts: StatusCounts,
    members: BTreeSet<IpId>,
}

impl SubnetPool {
    /// Create the pool for a new subnet, excluding its reserved ranges
    pub fn new(subnet: &Subnet) -> Self {
        let mut index = FreeSpaceIndex::new(subnet.cidr);
        for range in &subnet.reserved_ranges {
            index.absorb(*range);
        }
        Self {
            index,
            counts: StatusCounts::default(),
            members: BTreeSet::new(),
        }
    }

    pub fn index(&self) -> &FreeSpaceIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut FreeSpaceIndex {
        &mut self.index
    }

    pub fn counts(&self) -> &StatusCounts {
        &self.counts
    }

    /// Ids of the rows this subnet owns, ascending
    pub fn members(&self) -> &BTreeSet<IpId> {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Record a committed row
    pub fn add_member(&mut self, id: IpId, status: IpStatus) {
        if self.members.insert(id) {
            self.counts.increment(status);
        }
    }

    /// Forget a deleted row
    pub fn remove_member(&mut self, id: IpId, status: IpStatus) {
        if self.members.remove(&id) {
            self.counts.decrement(status);
        }
    }

    /// Track a status change of a member row
    pub fn transition(&mut self, from: IpStatus, to: IpStatus) {
        self.counts.transition(from, to);
    }

    /// Recompute the index from structural state
    ///
    /// The excluded set becomes the union of the subnet's reserved ranges,
    /// the blocks delegated to its children and the addresses of its rows.
    pub fn rebuild<'a>(
        &mut self,
        subnet: &Subnet,
        child_blocks: impl IntoIterator<Item = AddressRange>,
        addresses: impl IntoIterator<Item = &'a IpAddr>,
    ) {
        let mut index = FreeSpaceIndex::new(subnet.cidr);
        for range in &subnet.reserved_ranges {
            index.absorb(*range);
        }
        for block in child_blocks {
            index.absorb(block);
        }
        for addr in addresses {
            index.absorb(AddressRange::single(*addr));
        }
        tracing::debug!(
            subnet_id = %subnet.id,
            intervals = index.interval_count(),
            excluded = %index.used_count(),
            "Rebuilt free space index"
        );
        self.index = index;
    }
}
