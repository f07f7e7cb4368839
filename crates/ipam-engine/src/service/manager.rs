//! IPAM Manager Service
//!
//! Core orchestration service for the address space, providing:
//! - Subnet CRUD with overlap enforcement
//! - Hierarchy queries (children, ancestors, descendants)
//! - Carving child blocks out of their parent's free space
//! - Access to the allocation and utilization services

use super::{AllocationEngine, IpamState, UtilizationCalculator};
use crate::allocator::{SubnetForest, SubnetPool};
use crate::audit::{
    AuditAction, AuditEntry, AuditSink, BroadcastAuditSink, FanoutAuditSink, TracingAuditSink,
};
use crate::config::IpamConfig;
use crate::models::{normalize, parse_cidr, ActorId, AddressRange, Subnet, SubnetId};
use crate::{Error, Result};
use ipnet::IpNet;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;

/// Request to create a new subnet
#[derive(Debug, Clone)]
pub struct CreateSubnetRequest {
    /// CIDR block; host bits are cleared
    pub cidr: IpNet,
    /// Declared parent
    pub parent_id: Option<SubnetId>,
    /// Ranges never handed out by allocation
    pub reserved_ranges: Vec<AddressRange>,
    pub vlan_id: Option<u32>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl CreateSubnetRequest {
    pub fn new(cidr: IpNet) -> Self {
        Self {
            cidr,
            parent_id: None,
            reserved_ranges: Vec::new(),
            vlan_id: None,
            tags: Vec::new(),
            description: None,
            location: None,
        }
    }

    /// Build a request from CIDR text
    pub fn parse(cidr: &str) -> Result<Self> {
        Ok(Self::new(parse_cidr(cidr)?))
    }

    pub fn parent(mut self, parent_id: SubnetId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn reserve(mut self, range: AddressRange) -> Self {
        self.reserved_ranges.push(range);
        self
    }

    pub fn vlan(mut self, vlan_id: u32) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Changes to an existing subnet; `None` leaves a field untouched
///
/// CIDR and parent are immutable.
#[derive(Debug, Clone, Default)]
pub struct UpdateSubnetRequest {
    pub description: Option<String>,
    pub vlan_id: Option<u32>,
    pub location: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Replacement reserved ranges; rebuilds the subnet's free space
    pub reserved_ranges: Option<Vec<AddressRange>>,
}

/// Check reserved ranges against a block and merge them
fn validate_reserved(cidr: &IpNet, ranges: &[AddressRange]) -> Result<Vec<AddressRange>> {
    let block = AddressRange::from_net(cidr);
    for range in ranges {
        if range.family() != block.family() {
            return Err(Error::FamilyMismatch(range.to_string(), cidr.to_string()));
        }
        if !block.contains_range(range) {
            return Err(Error::OutOfBounds {
                target: range.to_string(),
                cidr: cidr.to_string(),
            });
        }
    }
    Ok(normalize(ranges))
}

/// Blocks of `subnet`'s children that lie inside its own block
fn delegated_blocks(forest: &SubnetForest, subnet: &Subnet) -> Result<Vec<AddressRange>> {
    let block = subnet.block_range();
    Ok(forest
        .children_of(subnet.id)?
        .iter()
        .filter_map(|id| forest.get(*id))
        .map(|child| child.block_range())
        .filter(|child| block.contains_range(child))
        .collect())
}

/// Recompute a subnet's free space from its structural state
fn rebuild_pool(state: &IpamState, forest: &SubnetForest, subnet: &Subnet) -> Result<()> {
    let blocks = delegated_blocks(forest, subnet)?;
    let pool = state.pool(subnet.id)?;
    let mut pool = pool.lock();
    let addresses: Vec<IpAddr> = state
        .store
        .get_many(pool.members())
        .into_iter()
        .map(|r| r.address)
        .collect();
    pool.rebuild(subnet, blocks, &addresses);
    Ok(())
}

/// IPAM Manager - owns the address space state
#[derive(Clone)]
pub struct IpamManager {
    state: Arc<IpamState>,
    /// Actor recorded on audit entries and created records
    actor: Option<ActorId>,
}

impl Default for IpamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IpamManager {
    /// Create a manager with default configuration, auditing to tracing
    pub fn new() -> Self {
        Self::with_config(IpamConfig::default())
    }

    /// Create a manager with custom configuration, auditing to tracing
    pub fn with_config(config: IpamConfig) -> Self {
        Self::with_audit(config, Arc::new(TracingAuditSink))
    }

    /// Create a manager with custom configuration and audit sink
    pub fn with_audit(config: IpamConfig, audit: Arc<dyn AuditSink>) -> Self {
        tracing::debug!(hierarchy = ?config.hierarchy, "Starting IPAM manager");
        Self {
            state: Arc::new(IpamState::new(config, audit)),
            actor: None,
        }
    }

    /// Create a manager auditing to tracing and to a broadcast channel sized
    /// by `audit_channel_capacity`
    ///
    /// Subscribers that fall more than the capacity behind see a lag error
    /// and skip the oldest entries.
    pub fn with_broadcast_audit(config: IpamConfig) -> (Self, Arc<BroadcastAuditSink>) {
        let broadcast = Arc::new(BroadcastAuditSink::new(config.audit_channel_capacity));
        let sink = FanoutAuditSink::new()
            .with(Arc::new(TracingAuditSink))
            .with(broadcast.clone());
        (Self::with_audit(config, Arc::new(sink)), broadcast)
    }

    /// Handle over the same state that records `actor` on every mutation
    pub fn acting_as(&self, actor: ActorId) -> Self {
        Self {
            state: Arc::clone(&self.state),
            actor: Some(actor),
        }
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn config(&self) -> &IpamConfig {
        &self.state.config
    }

    /// Allocation and IP lifecycle service
    pub fn allocation(&self) -> AllocationEngine {
        AllocationEngine::new(Arc::clone(&self.state), self.actor)
    }

    /// Utilization statistics service
    pub fn utilization(&self) -> UtilizationCalculator {
        UtilizationCalculator::new(Arc::clone(&self.state))
    }

    // ==================== Subnet Operations ====================

    /// Create a new subnet
    ///
    /// A subnet nested in its declared parent takes its block out of the
    /// parent's free space; the parent must not have recorded any address
    /// inside that block.
    pub fn create_subnet(&self, request: CreateSubnetRequest) -> Result<Subnet> {
        let cidr = request.cidr.trunc();
        let reserved_ranges = validate_reserved(&cidr, &request.reserved_ranges)?;

        let mut subnet = Subnet::new(cidr);
        subnet.parent_id = request.parent_id;
        subnet.reserved_ranges = reserved_ranges;
        subnet.vlan_id = request.vlan_id;
        subnet.tags = request.tags;
        subnet.description = request.description;
        subnet.location = request.location;
        subnet.created_by = self.actor;

        let mut forest = self.state.forest.write();
        let container = forest.check_placement(&cidr, request.parent_id)?;

        let block = AddressRange::from_net(&cidr);
        let parent_pool = match container {
            Some(parent_id) => {
                let pool = self.state.pool(parent_id)?;
                if let Some(addr) = self.state.store.addresses_in(&block).first() {
                    return Err(Error::AddressInUse(*addr));
                }
                Some(pool)
            }
            None => None,
        };

        let id = forest.insert(subnet)?;
        if let Some(pool) = parent_pool {
            pool.lock().index_mut().absorb(block);
        }

        let subnet = forest
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("subnet {} vanished after insert", id)))?;
        self.state
            .pools
            .insert(id, Arc::new(Mutex::new(SubnetPool::new(&subnet))));
        drop(forest);

        tracing::info!(
            subnet_id = %id,
            cidr = %subnet.cidr,
            parent_id = ?subnet.parent_id,
            "Created subnet"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::SubnetCreated, id.0)
                .actor(self.actor)
                .after(&subnet),
        );

        Ok(subnet)
    }

    /// Update subnet metadata or reserved ranges
    pub fn update_subnet(&self, id: SubnetId, request: UpdateSubnetRequest) -> Result<Subnet> {
        let mut forest = self.state.forest.write();
        let before = forest.get(id).cloned().ok_or(Error::SubnetNotFound(id))?;

        let reserved_ranges = request
            .reserved_ranges
            .as_deref()
            .map(|ranges| validate_reserved(&before.cidr, ranges))
            .transpose()?;

        let subnet = forest.get_mut(id).ok_or(Error::SubnetNotFound(id))?;
        if let Some(description) = request.description {
            subnet.description = Some(description);
        }
        if let Some(vlan_id) = request.vlan_id {
            subnet.vlan_id = Some(vlan_id);
        }
        if let Some(location) = request.location {
            subnet.location = Some(location);
        }
        if let Some(tags) = request.tags {
            subnet.tags = tags;
        }
        let reserved_changed = reserved_ranges.is_some();
        if let Some(ranges) = reserved_ranges {
            subnet.reserved_ranges = ranges;
        }
        subnet.updated_at = chrono::Utc::now();
        let after = subnet.clone();

        if reserved_changed {
            rebuild_pool(&self.state, &forest, &after)?;
        }
        drop(forest);

        tracing::info!(subnet_id = %id, reserved_changed, "Updated subnet");
        self.state.audit(
            AuditEntry::new(AuditAction::SubnetUpdated, id.0)
                .actor(self.actor)
                .before(&before)
                .after(&after),
        );

        Ok(after)
    }

    /// Delete a subnet that owns no IP records and has no children
    ///
    /// A block nested in its parent returns to the parent's free space.
    pub fn delete_subnet(&self, id: SubnetId) -> Result<Subnet> {
        let mut forest = self.state.forest.write();
        let pool = self.state.pool(id)?;
        let owned = pool.lock().member_count();

        let removed = forest.remove(id, owned)?;
        self.state.pools.remove(&id);

        if let Some(parent) = removed.parent_id.and_then(|pid| forest.get(pid)).cloned() {
            if parent.block_range().contains_range(&removed.block_range()) {
                rebuild_pool(&self.state, &forest, &parent)?;
            }
        }
        drop(forest);

        tracing::info!(subnet_id = %id, cidr = %removed.cidr, "Deleted subnet");
        self.state.audit(
            AuditEntry::new(AuditAction::SubnetDeleted, id.0)
                .actor(self.actor)
                .before(&removed),
        );

        Ok(removed)
    }

    /// Get a subnet by ID
    pub fn get_subnet(&self, id: SubnetId) -> Result<Subnet> {
        self.state
            .forest
            .read()
            .get(id)
            .cloned()
            .ok_or(Error::SubnetNotFound(id))
    }

    /// Find a subnet by its exact CIDR
    pub fn find_subnet(&self, cidr: &IpNet) -> Option<Subnet> {
        let forest = self.state.forest.read();
        forest.find_by_cidr(cidr).and_then(|id| forest.get(id)).cloned()
    }

    /// Deepest subnet whose block contains `addr`
    pub fn locate(&self, addr: IpAddr) -> Option<Subnet> {
        let forest = self.state.forest.read();
        forest.locate(addr).and_then(|id| forest.get(id)).cloned()
    }

    /// List all subnets ordered by id
    pub fn list_subnets(&self) -> Vec<Subnet> {
        self.state.forest.read().iter().cloned().collect()
    }

    pub fn subnet_count(&self) -> usize {
        self.state.forest.read().len()
    }

    /// Direct children in insertion order
    pub fn children_of(&self, id: SubnetId) -> Result<Vec<SubnetId>> {
        Ok(self.state.forest.read().children_of(id)?.to_vec())
    }

    /// Ancestors, nearest first
    pub fn ancestors_of(&self, id: SubnetId) -> Result<Vec<SubnetId>> {
        self.state.forest.read().ancestors_of(id)
    }

    /// All descendants, breadth first
    pub fn descendants_of(&self, id: SubnetId) -> Result<Vec<SubnetId>> {
        self.state.forest.read().descendants_of(id)
    }
}
