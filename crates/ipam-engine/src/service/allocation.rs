//! Allocation engine
//!
//! Batch first-fit allocation, explicit record creation and the IP
//! lifecycle:
//!
//! ```text
//!            assign / reassign
//!   FREE ───────────────────────► ASSIGNED
//!    ▲  ◄─────────────────────────  │
//!    │          release             │ quarantine
//!    │                              ▼
//!    └──────── release ─────── QUARANTINED ── reassign ──► ASSIGNED
//!
//!   RESERVED: entered and left only through `create_ip` / `update_ip`
//! ```
//!
//! Released rows stay in the inventory with status FREE and keep their
//! address excluded from first-fit; only `delete_ip` returns an address to
//! the pool.

use super::IpamState;
use crate::audit::{AuditAction, AuditEntry};
use crate::models::{
    ActorId, AddressFamily, AddressRange, ConflictAction, DeviceId, IpAddressRecord, IpId,
    IpStatus, SubnetId,
};
use crate::store::IpFilter;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Metadata key the scanner writes liveness results under
pub const SCAN_STATUS_KEY: &str = "scan_status";

/// Cooperative cancellation for an in-flight allocation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Request to allocate addresses by first-fit
#[derive(Debug, Clone)]
pub struct AllocateRequest {
    pub subnet_id: SubnetId,
    pub count: usize,
    /// Hostname recorded on every allocated row
    pub hostname: Option<String>,
    pub cancel: Option<CancelFlag>,
}

impl AllocateRequest {
    pub fn new(subnet_id: SubnetId, count: usize) -> Self {
        Self {
            subnet_id,
            count,
            hostname: None,
            cancel: None,
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }
}

/// Request to record a specific address
#[derive(Debug, Clone)]
pub struct CreateIpRequest {
    pub subnet_id: SubnetId,
    pub address: IpAddr,
    pub status: IpStatus,
    /// Required when `status` is ASSIGNED
    pub assigned_to_id: Option<DeviceId>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub interface: Option<String>,
    pub lease_expires: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CreateIpRequest {
    pub fn new(subnet_id: SubnetId, address: IpAddr) -> Self {
        Self {
            subnet_id,
            address,
            status: IpStatus::Free,
            assigned_to_id: None,
            hostname: None,
            mac_address: None,
            interface: None,
            lease_expires: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn status(mut self, status: IpStatus) -> Self {
        self.status = status;
        self
    }

    pub fn assigned_to(mut self, device: DeviceId) -> Self {
        self.status = IpStatus::Assigned;
        self.assigned_to_id = Some(device);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// Device binding for `assign`
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub device_id: DeviceId,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub interface: Option<String>,
}

impl AssignRequest {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            hostname: None,
            mac_address: None,
            interface: None,
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

/// Administrative changes to a record; `None` leaves a field untouched
///
/// Metadata is merged key-wise, a JSON `null` value removes the key.
#[derive(Debug, Clone, Default)]
pub struct UpdateIpRequest {
    pub status: Option<IpStatus>,
    pub assigned_to_id: Option<DeviceId>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub interface: Option<String>,
    pub lease_expires: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Offset paging for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    /// Clamped to the configured maximum; configured default when `None`
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }
}

/// Allocation and IP lifecycle service
#[derive(Clone)]
pub struct AllocationEngine {
    state: Arc<IpamState>,
    actor: Option<ActorId>,
}

impl AllocationEngine {
    pub(crate) fn new(state: Arc<IpamState>, actor: Option<ActorId>) -> Self {
        Self { state, actor }
    }

    // ==================== Record creation ====================

    /// Allocate up to `count` addresses, lowest first
    ///
    /// Rows are created with status FREE and their addresses excluded under
    /// the subnet's lock. Returns fewer rows than requested when the subnet
    /// runs out, `Exhausted` only when none are left.
    pub fn allocate(&self, request: AllocateRequest) -> Result<Vec<IpAddressRecord>> {
        let max = self.state.config.max_allocation_batch;
        if request.count == 0 || request.count > max {
            return Err(Error::InvalidArgument(format!(
                "count must be between 1 and {}, got {}",
                max, request.count
            )));
        }

        let subnet_id = request.subnet_id;
        let forest = self.state.forest.read();
        if !forest.contains(subnet_id) {
            return Err(Error::SubnetNotFound(subnet_id));
        }

        let pool = self.state.pool(subnet_id)?;
        let mut pool = pool.lock();

        let found = pool.index().find_first_fit(request.count);
        if found.is_empty() {
            tracing::warn!(subnet_id = %subnet_id, requested = request.count, "Subnet exhausted");
            return Err(Error::Exhausted(subnet_id));
        }
        if request.cancel.as_ref().map_or(false, |c| c.is_cancelled()) {
            tracing::debug!(subnet_id = %subnet_id, "Allocation cancelled before commit");
            return Err(Error::Cancelled);
        }

        let records = found
            .iter()
            .map(|addr| {
                let mut record = IpAddressRecord::new(*addr, subnet_id);
                record.hostname = request.hostname.clone();
                record.created_by = self.actor;
                record
            })
            .collect();
        let stored = self.state.store.insert_batch(records)?;

        for record in &stored {
            pool.index_mut().absorb(AddressRange::single(record.address));
            pool.add_member(record.id, record.status);
        }
        drop(pool);
        drop(forest);

        tracing::info!(
            subnet_id = %subnet_id,
            requested = request.count,
            allocated = stored.len(),
            "Allocated IPs"
        );
        for record in &stored {
            self.state.audit(
                AuditEntry::new(AuditAction::IpAllocated, record.id.0)
                    .actor(self.actor)
                    .after(record),
            );
        }

        Ok(stored)
    }

    /// Record a specific address in a subnet
    ///
    /// Addresses inside a reserved range may be recorded (for example a
    /// RESERVED gateway row); addresses inside a child subnet's block may not.
    pub fn create_ip(&self, request: CreateIpRequest) -> Result<IpAddressRecord> {
        let subnet_id = request.subnet_id;
        let address = request.address;

        match (request.status, request.assigned_to_id) {
            (IpStatus::Assigned, None) => {
                return Err(Error::InvalidArgument(format!(
                    "{} cannot be created as assigned without a device",
                    address
                )))
            }
            (IpStatus::Free | IpStatus::Reserved, Some(device)) => {
                return Err(Error::InvalidArgument(format!(
                    "{} cannot be bound to device {} with status {}",
                    address, device, request.status
                )))
            }
            _ => {}
        }

        let forest = self.state.forest.read();
        let subnet = forest.get(subnet_id).ok_or(Error::SubnetNotFound(subnet_id))?;

        if AddressFamily::of(&address) != subnet.family() {
            return Err(Error::FamilyMismatch(address.to_string(), subnet.cidr.to_string()));
        }
        if !subnet.host_range().map_or(false, |hosts| hosts.contains(address)) {
            return Err(Error::OutOfBounds {
                target: address.to_string(),
                cidr: subnet.cidr.to_string(),
            });
        }
        if let Some(owner) = forest.locate(address).filter(|&owner| owner != subnet_id) {
            return Err(Error::DelegatedToChild {
                address,
                child: owner,
            });
        }

        let pool = self.state.pool(subnet_id)?;
        let mut pool = pool.lock();

        let mut record = IpAddressRecord::new(address, subnet_id);
        record.status = request.status;
        record.assigned_to_id = request.assigned_to_id;
        record.hostname = request.hostname;
        record.mac_address = request.mac_address;
        record.interface = request.interface;
        record.lease_expires = request.lease_expires;
        record.metadata = request.metadata;
        record.created_by = self.actor;

        let record = self.state.store.insert(record)?;
        pool.index_mut().absorb(AddressRange::single(address));
        pool.add_member(record.id, record.status);
        drop(pool);
        drop(forest);

        tracing::info!(
            ip_id = %record.id,
            address = %address,
            subnet_id = %subnet_id,
            status = %record.status,
            "Created IP"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::IpCreated, record.id.0)
                .actor(self.actor)
                .after(&record),
        );

        Ok(record)
    }

    // ==================== Lifecycle ====================

    /// Apply a change to a record under its subnet's lock
    fn mutate<F>(&self, ip_id: IpId, f: F) -> Result<(IpAddressRecord, IpAddressRecord)>
    where
        F: FnOnce(&mut IpAddressRecord) -> Result<()>,
    {
        let subnet_id = self
            .state
            .store
            .get(ip_id)
            .ok_or(Error::IpNotFound(ip_id))?
            .subnet_id;
        let pool = self.state.pool(subnet_id)?;
        let mut pool = pool.lock();

        let (before, after) = self.state.store.update(ip_id, f)?;
        pool.transition(before.status, after.status);
        Ok((before, after))
    }

    /// Bind a FREE or QUARANTINED address to a device
    pub fn assign(&self, ip_id: IpId, request: AssignRequest) -> Result<IpAddressRecord> {
        let device_id = request.device_id;
        let (before, after) = self.mutate(ip_id, |record| {
            if !matches!(record.status, IpStatus::Free | IpStatus::Quarantined) {
                return Err(Error::InvalidTransition {
                    from: record.status,
                    to: IpStatus::Assigned,
                });
            }
            record.status = IpStatus::Assigned;
            record.assigned_to_id = Some(device_id);
            if let Some(hostname) = request.hostname {
                record.hostname = Some(hostname);
            }
            if let Some(mac) = request.mac_address {
                record.mac_address = Some(mac);
            }
            if let Some(interface) = request.interface {
                record.interface = Some(interface);
            }
            Ok(())
        })?;

        tracing::info!(
            ip_id = %ip_id,
            address = %after.address,
            device_id = %device_id,
            from = %before.status,
            "Assigned IP"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::IpAssigned, ip_id.0)
                .actor(self.actor)
                .before(&before)
                .after(&after),
        );

        Ok(after)
    }

    /// Resolve an address conflict
    ///
    /// - `Release`: status FREE, device cleared; the row keeps its address
    /// - `Reassign`: status ASSIGNED to `new_device`, which is required
    /// - `Quarantine`: status QUARANTINED, device kept
    pub fn resolve_conflict(
        &self,
        ip_id: IpId,
        action: ConflictAction,
        new_device: Option<DeviceId>,
    ) -> Result<IpAddressRecord> {
        let target = match action {
            ConflictAction::Release => IpStatus::Free,
            ConflictAction::Reassign => IpStatus::Assigned,
            ConflictAction::Quarantine => IpStatus::Quarantined,
        };
        let device = match action {
            ConflictAction::Reassign => Some(new_device.ok_or(Error::MissingDevice(ip_id))?),
            _ => None,
        };

        let (before, after) = self.mutate(ip_id, |record| {
            if !record.status.can_transition_to(target) {
                return Err(Error::InvalidTransition {
                    from: record.status,
                    to: target,
                });
            }
            record.status = target;
            match action {
                ConflictAction::Release => record.assigned_to_id = None,
                ConflictAction::Reassign => record.assigned_to_id = device,
                ConflictAction::Quarantine => {}
            }
            Ok(())
        })?;

        tracing::info!(
            ip_id = %ip_id,
            address = %after.address,
            action = %action,
            from = %before.status,
            to = %after.status,
            "Resolved IP conflict"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::ConflictResolved, ip_id.0)
                .actor(self.actor)
                .before(&before)
                .after(&after)
                .detail(action.as_str()),
        );

        Ok(after)
    }

    /// Administrative update of a record
    ///
    /// May set any status. ASSIGNED requires a device (given or already
    /// bound); FREE and RESERVED clear the device.
    pub fn update_ip(&self, ip_id: IpId, request: UpdateIpRequest) -> Result<IpAddressRecord> {
        let (before, after) = self.mutate(ip_id, move |record| {
            if let Some(status) = request.status {
                record.status = status;
            }
            if let Some(device) = request.assigned_to_id {
                record.assigned_to_id = Some(device);
            }
            match record.status {
                IpStatus::Assigned if record.assigned_to_id.is_none() => {
                    return Err(Error::MissingDevice(record.id));
                }
                IpStatus::Free | IpStatus::Reserved => {
                    if let Some(device) = request.assigned_to_id {
                        return Err(Error::InvalidArgument(format!(
                            "device {} cannot be bound with status {}",
                            device, record.status
                        )));
                    }
                    record.assigned_to_id = None;
                }
                _ => {}
            }

            if let Some(hostname) = request.hostname {
                record.hostname = Some(hostname);
            }
            if let Some(mac) = request.mac_address {
                record.mac_address = Some(mac);
            }
            if let Some(interface) = request.interface {
                record.interface = Some(interface);
            }
            if let Some(lease_expires) = request.lease_expires {
                record.lease_expires = Some(lease_expires);
            }
            if let Some(last_seen) = request.last_seen {
                record.last_seen = Some(last_seen);
            }
            for (key, value) in request.metadata {
                if value.is_null() {
                    record.metadata.remove(&key);
                } else {
                    record.metadata.insert(key, value);
                }
            }
            Ok(())
        })?;

        tracing::debug!(
            ip_id = %ip_id,
            address = %after.address,
            from = %before.status,
            to = %after.status,
            "Updated IP"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::IpUpdated, ip_id.0)
                .actor(self.actor)
                .before(&before)
                .after(&after),
        );

        Ok(after)
    }

    /// Delete a record, returning its address to first-fit
    ///
    /// Addresses inside a reserved range stay excluded.
    pub fn delete_ip(&self, ip_id: IpId) -> Result<IpAddressRecord> {
        let subnet_id = self
            .state
            .store
            .get(ip_id)
            .ok_or(Error::IpNotFound(ip_id))?
            .subnet_id;

        let forest = self.state.forest.read();
        let subnet = forest.get(subnet_id).ok_or(Error::SubnetNotFound(subnet_id))?;
        let pool = self.state.pool(subnet_id)?;
        let mut pool = pool.lock();

        let removed = self.state.store.remove(ip_id)?;
        pool.remove_member(removed.id, removed.status);
        if !subnet.is_reserved(removed.address) {
            pool.index_mut().release(removed.address)?;
        }
        drop(pool);
        drop(forest);

        tracing::info!(
            ip_id = %ip_id,
            address = %removed.address,
            subnet_id = %subnet_id,
            "Deleted IP"
        );
        self.state.audit(
            AuditEntry::new(AuditAction::IpDeleted, ip_id.0)
                .actor(self.actor)
                .before(&removed),
        );

        Ok(removed)
    }

    // ==================== Queries ====================

    /// Get a record by ID
    pub fn get_ip(&self, ip_id: IpId) -> Result<IpAddressRecord> {
        self.state.store.get(ip_id).ok_or(Error::IpNotFound(ip_id))
    }

    /// Look up the record holding an address
    pub fn find_ip(&self, address: IpAddr) -> Option<IpAddressRecord> {
        self.state
            .store
            .find_by_address(address)
            .and_then(|id| self.state.store.get(id))
    }

    /// Filtered, paged listing ordered by id
    pub fn list_ips(&self, filter: &IpFilter, page: Page) -> Vec<IpAddressRecord> {
        let limit = self.state.config.page_size(page.limit);
        self.state
            .store
            .list(filter)
            .into_iter()
            .skip(page.skip)
            .take(limit)
            .collect()
    }

    /// All records a subnet owns, ordered by id
    pub fn subnet_ips(&self, subnet_id: SubnetId) -> Result<Vec<IpAddressRecord>> {
        let pool = self.state.pool(subnet_id)?;
        let pool = pool.lock();
        Ok(self.state.store.get_many(pool.members()))
    }

    // ==================== Scanner contract ====================

    /// Rows the scanner should probe
    pub fn scan_targets(&self) -> Vec<IpAddressRecord> {
        self.state.store.list(&IpFilter::status(IpStatus::Assigned))
    }

    /// Write back a probe result through the normal update path
    pub fn record_scan(
        &self,
        ip_id: IpId,
        scan_status: impl Into<String>,
        seen_at: Option<DateTime<Utc>>,
    ) -> Result<IpAddressRecord> {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            SCAN_STATUS_KEY.to_string(),
            serde_json::Value::String(scan_status.into()),
        );
        self.update_ip(
            ip_id,
            UpdateIpRequest {
                last_seen: seen_at,
                metadata,
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{CreateSubnetRequest, IpamManager};

    fn manager_with_subnet(cidr: &str) -> (IpamManager, SubnetId) {
        let manager = IpamManager::new();
        let subnet = manager
            .create_subnet(CreateSubnetRequest::parse(cidr).unwrap())
            .unwrap();
        (manager, subnet.id)
    }

    #[test]
    fn test_allocate_first_fit() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();

        let ips = engine
            .allocate(AllocateRequest::new(subnet_id, 2).hostname("node"))
            .unwrap();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0].address.to_string(), "10.0.0.1");
        assert_eq!(ips[1].address.to_string(), "10.0.0.2");
        assert!(ips.iter().all(|r| r.status == IpStatus::Free));
        assert!(ips.iter().all(|r| r.hostname.as_deref() == Some("node")));
    }

    #[test]
    fn test_allocate_bounds() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();

        assert!(matches!(
            engine.allocate(AllocateRequest::new(subnet_id, 0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.allocate(AllocateRequest::new(subnet_id, 101)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.allocate(AllocateRequest::new(SubnetId(999), 1)),
            Err(Error::SubnetNotFound(_))
        ));
    }

    #[test]
    fn test_partial_then_exhausted() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/29");
        let engine = manager.allocation();

        let ips = engine.allocate(AllocateRequest::new(subnet_id, 10)).unwrap();
        assert_eq!(ips.len(), 6);
        assert!(matches!(
            engine.allocate(AllocateRequest::new(subnet_id, 1)),
            Err(Error::Exhausted(_))
        ));
    }

    #[test]
    fn test_cancelled_allocation_commits_nothing() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let flag = CancelFlag::new();
        flag.cancel();

        let result = engine.allocate(AllocateRequest::new(subnet_id, 3).cancel_flag(flag));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(engine.subnet_ips(subnet_id).unwrap().is_empty());

        let ips = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap();
        assert_eq!(ips[0].address.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_assign_and_resolve() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let ip = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap().remove(0);

        let assigned = engine
            .assign(ip.id, AssignRequest::new(DeviceId(1)).hostname("web-01"))
            .unwrap();
        assert_eq!(assigned.status, IpStatus::Assigned);
        assert_eq!(assigned.assigned_to_id, Some(DeviceId(1)));

        // Already assigned
        assert!(matches!(
            engine.assign(ip.id, AssignRequest::new(DeviceId(2))),
            Err(Error::InvalidTransition { .. })
        ));

        let quarantined = engine
            .resolve_conflict(ip.id, ConflictAction::Quarantine, None)
            .unwrap();
        assert_eq!(quarantined.status, IpStatus::Quarantined);
        assert_eq!(quarantined.assigned_to_id, Some(DeviceId(1)));

        let reassigned = engine
            .assign(ip.id, AssignRequest::new(DeviceId(2)))
            .unwrap();
        assert_eq!(reassigned.assigned_to_id, Some(DeviceId(2)));

        let released = engine
            .resolve_conflict(ip.id, ConflictAction::Release, None)
            .unwrap();
        assert_eq!(released.status, IpStatus::Free);
        assert!(released.assigned_to_id.is_none());
    }

    #[test]
    fn test_reassign_requires_device() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let ip = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap().remove(0);

        assert!(matches!(
            engine.resolve_conflict(ip.id, ConflictAction::Reassign, None),
            Err(Error::MissingDevice(_))
        ));
        assert!(matches!(
            engine.resolve_conflict(ip.id, ConflictAction::Quarantine, None),
            Err(Error::InvalidTransition {
                from: IpStatus::Free,
                to: IpStatus::Quarantined
            })
        ));
    }

    #[test]
    fn test_released_row_keeps_address() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let ip = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap().remove(0);
        engine.assign(ip.id, AssignRequest::new(DeviceId(5))).unwrap();
        engine.resolve_conflict(ip.id, ConflictAction::Release, None).unwrap();

        let next = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap();
        assert_eq!(next[0].address.to_string(), "10.0.0.2");

        engine.delete_ip(ip.id).unwrap();
        let next = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap();
        assert_eq!(next[0].address.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_reserved_status_is_administrative() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let gateway = engine
            .create_ip(
                CreateIpRequest::new(subnet_id, "10.0.0.1".parse().unwrap())
                    .status(IpStatus::Reserved)
                    .hostname("gw"),
            )
            .unwrap();

        assert!(matches!(
            engine.resolve_conflict(gateway.id, ConflictAction::Release, None),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.assign(gateway.id, AssignRequest::new(DeviceId(1))),
            Err(Error::InvalidTransition { .. })
        ));

        let freed = engine
            .update_ip(
                gateway.id,
                UpdateIpRequest {
                    status: Some(IpStatus::Free),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(freed.status, IpStatus::Free);
    }

    #[test]
    fn test_create_ip_validation() {
        let manager = IpamManager::new();
        let parent = manager
            .create_subnet(CreateSubnetRequest::parse("10.0.0.0/24").unwrap())
            .unwrap();
        let child = manager
            .create_subnet(CreateSubnetRequest::parse("10.0.0.128/25").unwrap().parent(parent.id))
            .unwrap();
        let engine = manager.allocation();

        let at = |addr: &str| CreateIpRequest::new(parent.id, addr.parse().unwrap());

        assert!(matches!(
            engine.create_ip(at("10.0.1.5")),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            engine.create_ip(at("10.0.0.0")),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            engine.create_ip(at("fd00::1")),
            Err(Error::FamilyMismatch(_, _))
        ));
        assert!(matches!(
            engine.create_ip(at("10.0.0.200")),
            Err(Error::DelegatedToChild { child: c, .. }) if c == child.id
        ));
        assert!(matches!(
            engine.create_ip(at("10.0.0.5").status(IpStatus::Assigned)),
            Err(Error::InvalidArgument(_))
        ));

        engine.create_ip(at("10.0.0.5")).unwrap();
        assert!(matches!(
            engine.create_ip(at("10.0.0.5")),
            Err(Error::AddressInUse(_))
        ));

        // Same address through the child is a global duplicate too
        engine
            .create_ip(CreateIpRequest::new(child.id, "10.0.0.200".parse().unwrap()))
            .unwrap();
        assert!(engine.find_ip("10.0.0.200".parse().unwrap()).is_some());
    }

    #[test]
    fn test_create_ip_excludes_address() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        engine
            .create_ip(
                CreateIpRequest::new(subnet_id, "10.0.0.1".parse().unwrap())
                    .assigned_to(DeviceId(3)),
            )
            .unwrap();

        let ips = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap();
        assert_eq!(ips[0].address.to_string(), "10.0.0.2");
    }

    #[test]
    fn test_update_ip_rules() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let ip = engine.allocate(AllocateRequest::new(subnet_id, 1)).unwrap().remove(0);

        let missing = engine.update_ip(
            ip.id,
            UpdateIpRequest {
                status: Some(IpStatus::Assigned),
                ..Default::default()
            },
        );
        assert!(matches!(missing, Err(Error::MissingDevice(_))));

        let mut metadata = BTreeMap::new();
        metadata.insert("owner".to_string(), serde_json::json!("team-a"));
        let updated = engine
            .update_ip(
                ip.id,
                UpdateIpRequest {
                    status: Some(IpStatus::Assigned),
                    assigned_to_id: Some(DeviceId(9)),
                    mac_address: Some("aa:bb:cc:dd:ee:ff".to_string()),
                    metadata,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.assigned_to_id, Some(DeviceId(9)));
        assert_eq!(updated.metadata["owner"], "team-a");

        let mut metadata = BTreeMap::new();
        metadata.insert("owner".to_string(), serde_json::Value::Null);
        let reserved = engine
            .update_ip(
                ip.id,
                UpdateIpRequest {
                    status: Some(IpStatus::Reserved),
                    metadata,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(reserved.assigned_to_id.is_none());
        assert!(reserved.metadata.is_empty());
        assert_eq!(reserved.mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_scanner_contract() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        let ips = engine.allocate(AllocateRequest::new(subnet_id, 3)).unwrap();
        engine.assign(ips[1].id, AssignRequest::new(DeviceId(1))).unwrap();

        let targets = engine.scan_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, ips[1].id);

        let seen = Utc::now();
        let scanned = engine.record_scan(ips[1].id, "up", Some(seen)).unwrap();
        assert_eq!(scanned.last_seen, Some(seen));
        assert_eq!(scanned.metadata[SCAN_STATUS_KEY], "up");
        assert_eq!(scanned.status, IpStatus::Assigned);
    }

    #[test]
    fn test_list_paging() {
        let (manager, subnet_id) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        engine.allocate(AllocateRequest::new(subnet_id, 10)).unwrap();

        let page = engine.list_ips(&IpFilter::subnet(subnet_id), Page::new(4, 3));
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].address.to_string(), "10.0.0.5");

        let rest = engine.list_ips(&IpFilter::default(), Page::new(8, 50));
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_unknown_ip() {
        let (manager, _) = manager_with_subnet("10.0.0.0/24");
        let engine = manager.allocation();
        assert!(matches!(engine.get_ip(IpId(77)), Err(Error::IpNotFound(_))));
        assert!(matches!(
            engine.assign(IpId(77), AssignRequest::new(DeviceId(1))),
            Err(Error::IpNotFound(_))
        ));
        assert!(matches!(engine.delete_ip(IpId(77)), Err(Error::IpNotFound(_))));
    }
}
