//! IPAM services
//!
//! `IpamManager` owns all shared state behind one `Arc` and hands out the
//! allocation and utilization services as cheap views over it:
//!
//! ```rust,ignore
//! use ipam_engine::service::{AllocateRequest, CreateSubnetRequest, IpamManager};
//!
//! let manager = IpamManager::new();
//! let subnet = manager.create_subnet(CreateSubnetRequest::parse("10.0.0.0/24")?)?;
//! let ips = manager.allocation().allocate(AllocateRequest::new(subnet.id, 3))?;
//! let stats = manager.utilization().stats(subnet.id)?;
//! ```
//!
//! Lock order is always forest, then subnet pool, then record store.

mod allocation;
mod manager;
mod utilization;

pub use allocation::{
    AllocateRequest, AllocationEngine, AssignRequest, CancelFlag, CreateIpRequest, Page,
    UpdateIpRequest, SCAN_STATUS_KEY,
};
pub use manager::{CreateSubnetRequest, IpamManager, UpdateSubnetRequest};
pub use utilization::{utilization_percent, UtilizationCalculator};

use crate::allocator::{SubnetForest, SubnetPool};
use crate::audit::{AuditEntry, AuditSink};
use crate::config::IpamConfig;
use crate::models::SubnetId;
use crate::store::IpStore;
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// State shared by all service handles
pub(crate) struct IpamState {
    pub(crate) config: IpamConfig,
    /// Forest-wide lock guarding placement and hierarchy
    pub(crate) forest: RwLock<SubnetForest>,
    /// One lockable pool per subnet
    pub(crate) pools: DashMap<SubnetId, Arc<Mutex<SubnetPool>>>,
    pub(crate) store: IpStore,
    pub(crate) audit: Arc<dyn AuditSink>,
}

impl IpamState {
    pub(crate) fn new(config: IpamConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            forest: RwLock::new(SubnetForest::new(config.hierarchy)),
            pools: DashMap::new(),
            store: IpStore::new(),
            audit,
            config,
        }
    }

    /// Handle to a subnet's pool, cloned out of the map before locking
    pub(crate) fn pool(&self, id: SubnetId) -> Result<Arc<Mutex<SubnetPool>>> {
        self.pools
            .get(&id)
            .map(|p| Arc::clone(p.value()))
            .ok_or(Error::SubnetNotFound(id))
    }

    pub(crate) fn audit(&self, entry: AuditEntry) {
        self.audit.record(entry);
    }
}
