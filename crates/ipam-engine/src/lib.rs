//! IPAM Address Space Engine
//!
//! Tracks a forest of IPv4 and IPv6 CIDR blocks and the host addresses
//! recorded inside them:
//! - Subnet placement with overlap enforcement and optional nesting under a
//!   declared parent
//! - Per-subnet free space as sorted excluded intervals, so first-fit
//!   allocation in an IPv6 /64 costs the same as in an IPv4 /24
//! - Concurrency-safe batch allocation under a per-subnet lock
//! - The IP lifecycle (free, assigned, quarantined, reserved) and conflict
//!   resolution
//! - Utilization statistics without row scans
//! - Audit trail, batch import/export and a scanner write-back contract

pub mod allocator;
pub mod audit;
pub mod bulk;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

// Re-export core types
pub use allocator::{FreeSpaceIndex, HierarchyPolicy, SubnetForest};
pub use audit::{AuditEntry, AuditSink, InMemoryAuditLog};
pub use config::IpamConfig;
pub use error::{Error, Result};
pub use models::{
    AddressCount, AddressFamily, AddressRange, ConflictAction, DeviceId, IpAddressRecord, IpId,
    IpStatus, Subnet, SubnetId, SubnetStats,
};
pub use service::{
    AllocateRequest, AllocationEngine, AssignRequest, CreateIpRequest, CreateSubnetRequest,
    IpamManager, UpdateIpRequest, UpdateSubnetRequest, UtilizationCalculator,
};
pub use store::IpFilter;
