//! Subnet utilization statistics
//!
//! Counts come from the subnet's free-space index and per-status counters,
//! never from scanning rows.

use super::IpamState;
use crate::models::{AddressCount, SubnetId, SubnetStats};
use crate::{Error, Result};
use std::sync::Arc;

/// `used / total * 100` rounded to two decimals, 0 for empty blocks
pub fn utilization_percent(used: AddressCount, total: AddressCount) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = used as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Utilization statistics service
#[derive(Clone)]
pub struct UtilizationCalculator {
    state: Arc<IpamState>,
}

impl UtilizationCalculator {
    pub(crate) fn new(state: Arc<IpamState>) -> Self {
        Self { state }
    }

    /// Statistics for one subnet
    ///
    /// `used` counts ASSIGNED and RESERVED rows; `allocatable` is what
    /// first-fit can still hand out after reserved ranges, child blocks and
    /// existing rows.
    pub fn stats(&self, subnet_id: SubnetId) -> Result<SubnetStats> {
        let forest = self.state.forest.read();
        let children_count = forest.children_of(subnet_id)?.len();

        let pool = self.state.pool(subnet_id)?;
        let pool = pool.lock();

        let total = pool.index().total_count();
        let used = (pool.counts().used() as AddressCount).min(total);

        Ok(SubnetStats {
            subnet_id,
            total,
            used,
            free: total - used,
            allocatable: pool.index().free_count(),
            utilization_percent: utilization_percent(used, total),
            children_count,
        })
    }

    /// Statistics for every subnet, ordered by id
    pub fn all_stats(&self) -> Vec<SubnetStats> {
        let ids: Vec<SubnetId> = self.state.forest.read().iter().map(|s| s.id).collect();
        ids.into_iter()
            .filter_map(|id| match self.stats(id) {
                Ok(stats) => Some(stats),
                // Deleted since the id snapshot
                Err(Error::SubnetNotFound(_)) => None,
                Err(e) => {
                    tracing::warn!(subnet_id = %id, error = %e, "Failed to compute stats");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressRange, ConflictAction, DeviceId, IpStatus};
    use crate::service::{
        AllocateRequest, AssignRequest, CreateIpRequest, CreateSubnetRequest, IpamManager,
    };

    #[test]
    fn test_percent_rounding() {
        assert_eq!(utilization_percent(0, 0), 0.0);
        assert_eq!(utilization_percent(1, 3), 33.33);
        assert_eq!(utilization_percent(2, 3), 66.67);
        assert_eq!(utilization_percent(254, 254), 100.0);
    }

    #[test]
    fn test_stats_counts_assigned_and_reserved() {
        let manager = IpamManager::new();
        let subnet = manager
            .create_subnet(
                CreateSubnetRequest::parse("10.0.0.0/24")
                    .unwrap()
                    .reserve(AddressRange::parse("10.0.0.1-10.0.0.10").unwrap()),
            )
            .unwrap();
        let engine = manager.allocation();

        let ips = engine.allocate(AllocateRequest::new(subnet.id, 4)).unwrap();
        engine.assign(ips[0].id, AssignRequest::new(DeviceId(1))).unwrap();
        engine.assign(ips[1].id, AssignRequest::new(DeviceId(2))).unwrap();
        engine
            .resolve_conflict(ips[1].id, ConflictAction::Quarantine, None)
            .unwrap();
        engine
            .create_ip(
                CreateIpRequest::new(subnet.id, "10.0.0.1".parse().unwrap())
                    .status(IpStatus::Reserved),
            )
            .unwrap();

        let stats = manager.utilization().stats(subnet.id).unwrap();
        assert_eq!(stats.total, 254);
        assert_eq!(stats.used, 2);
        assert_eq!(stats.free, 252);
        assert_eq!(stats.allocatable, 254 - 10 - 4);
        assert_eq!(stats.utilization_percent, 0.79);
        assert_eq!(stats.children_count, 0);
    }

    #[test]
    fn test_degenerate_blocks() {
        let manager = IpamManager::new();
        for cidr in ["10.0.0.0/31", "10.0.0.2/32", "fd00::/127", "fd00::2/128"] {
            let subnet = manager
                .create_subnet(CreateSubnetRequest::parse(cidr).unwrap())
                .unwrap();
            let stats = manager.utilization().stats(subnet.id).unwrap();
            assert_eq!(stats.total, 0, "{}", cidr);
            assert_eq!(stats.utilization_percent, 0.0);
        }
    }

    #[test]
    fn test_children_count_is_direct_only() {
        let manager = IpamManager::new();
        let root = manager
            .create_subnet(CreateSubnetRequest::parse("10.0.0.0/16").unwrap())
            .unwrap();
        let mid = manager
            .create_subnet(CreateSubnetRequest::parse("10.0.1.0/24").unwrap().parent(root.id))
            .unwrap();
        manager
            .create_subnet(CreateSubnetRequest::parse("10.0.1.0/26").unwrap().parent(mid.id))
            .unwrap();
        manager
            .create_subnet(CreateSubnetRequest::parse("10.0.2.0/24").unwrap().parent(root.id))
            .unwrap();

        let stats = manager.utilization().stats(root.id).unwrap();
        assert_eq!(stats.children_count, 2);
        assert_eq!(stats.total, 65534);
        assert_eq!(stats.allocatable, 65534 - 512);

        assert_eq!(manager.utilization().all_stats().len(), 4);
    }

    #[test]
    fn test_ipv6_stats() {
        let manager = IpamManager::new();
        let subnet = manager
            .create_subnet(CreateSubnetRequest::parse("2001:db8::/64").unwrap())
            .unwrap();
        manager
            .allocation()
            .allocate(AllocateRequest::new(subnet.id, 5))
            .unwrap();

        let stats = manager.utilization().stats(subnet.id).unwrap();
        assert_eq!(stats.total, (1u128 << 64) - 1);
        assert_eq!(stats.used, 0);
        assert_eq!(stats.allocatable, (1u128 << 64) - 6);
    }
}
