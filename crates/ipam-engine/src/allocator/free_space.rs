//! Per-subnet free space tracking
//!
//! Tracks which host addresses of a subnet are excluded from allocation as a
//! sorted set of disjoint, non-adjacent intervals. Allocation walks the gaps
//! between intervals, so its cost depends on the number of intervals and the
//! number of addresses requested, never on the size of the block. An IPv6 /64
//! costs the same as an IPv4 /24.

use crate::models::{
    addr_to_u128, u128_to_addr, AddressCount, AddressFamily, AddressRange,
};
use crate::{Error, Result};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Excluded-interval index over one subnet's host range
#[derive(Debug, Clone)]
pub struct FreeSpaceIndex {
    /// Subnet CIDR block
    cidr: IpNet,
    /// Assignable host range, `None` when the block has no hosts
    hosts: Option<AddressRange>,
    /// Excluded intervals keyed by start, value is the inclusive end
    excluded: BTreeMap<u128, u128>,
    /// Number of addresses covered by `excluded`
    excluded_count: AddressCount,
}

impl FreeSpaceIndex {
    /// Create an index with every host address free
    pub fn new(cidr: IpNet) -> Self {
        Self {
            cidr,
            hosts: crate::models::host_range(&cidr),
            excluded: BTreeMap::new(),
            excluded_count: 0,
        }
    }

    /// Get the subnet CIDR
    pub fn cidr(&self) -> IpNet {
        self.cidr
    }

    /// Get the assignable host range
    pub fn host_range(&self) -> Option<AddressRange> {
        self.hosts
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::of_net(&self.cidr)
    }

    fn out_of_bounds(&self, target: impl ToString) -> Error {
        Error::OutOfBounds {
            target: target.to_string(),
            cidr: self.cidr.to_string(),
        }
    }

    /// Check that `range` lies within the host range
    fn check_bounds(&self, range: &AddressRange) -> Result<()> {
        match self.hosts {
            Some(hosts) if hosts.contains_range(range) => Ok(()),
            _ => Err(self.out_of_bounds(range)),
        }
    }

    /// The excluded interval containing `value`, if any
    fn covering(&self, value: u128) -> Option<(u128, u128)> {
        self.excluded
            .range(..=value)
            .next_back()
            .filter(|&(_, &end)| end >= value)
            .map(|(&start, &end)| (start, end))
    }

    /// Check if any excluded interval shares an address with `[start, end]`
    fn intersects(&self, start: u128, end: u128) -> bool {
        self.excluded
            .range(..=end)
            .next_back()
            .map_or(false, |(_, &e)| e >= start)
    }

    /// Insert `[start, end]`, coalescing with overlapping or touching intervals
    fn merge_interval(&mut self, mut start: u128, mut end: u128) {
        let prev = self
            .excluded
            .range(..=start)
            .next_back()
            .map(|(&s, &e)| (s, e));
        if let Some((prev_start, prev_end)) = prev {
            if prev_end.checked_add(1).map_or(true, |next| next >= start) {
                self.excluded.remove(&prev_start);
                self.excluded_count -= prev_end - prev_start + 1;
                start = prev_start;
                end = end.max(prev_end);
            }
        }

        loop {
            let next = self
                .excluded
                .range(start..)
                .next()
                .map(|(&s, &e)| (s, e));
            match next {
                Some((next_start, next_end))
                    if end.checked_add(1).map_or(true, |limit| next_start <= limit) =>
                {
                    self.excluded.remove(&next_start);
                    self.excluded_count -= next_end - next_start + 1;
                    end = end.max(next_end);
                }
                _ => break,
            }
        }

        self.excluded.insert(start, end);
        self.excluded_count += end - start + 1;
    }

    /// Exclude `range` from allocation
    ///
    /// Fails with `OutOfBounds` if the range is not inside the host range
    /// and with `AlreadyExcluded` if any address of it is already excluded,
    /// so a successful reserve can always be undone by releasing the same
    /// addresses.
    pub fn reserve(&mut self, range: AddressRange) -> Result<()> {
        self.check_bounds(&range)?;
        if self.intersects(range.start(), range.end()) {
            return Err(Error::AlreadyExcluded(range.to_string()));
        }
        self.merge_interval(range.start(), range.end());
        Ok(())
    }

    /// Exclude a single address
    pub fn reserve_address(&mut self, addr: IpAddr) -> Result<()> {
        self.reserve(AddressRange::single(addr))
    }

    /// Exclude whatever part of `range` falls inside the host range
    ///
    /// Idempotent; used to seed the index from reserved ranges, child blocks
    /// and existing records.
    pub fn absorb(&mut self, range: AddressRange) {
        if let Some(clipped) = self.hosts.and_then(|hosts| hosts.intersection(&range)) {
            self.merge_interval(clipped.start(), clipped.end());
        }
    }

    /// Return an address to the free pool
    ///
    /// Returns `false` if the address was not excluded.
    pub fn release(&mut self, addr: IpAddr) -> Result<bool> {
        let single = AddressRange::single(addr);
        self.check_bounds(&single)?;

        let value = single.start();
        let Some((start, end)) = self.covering(value) else {
            return Ok(false);
        };

        self.excluded.remove(&start);
        if start < value {
            self.excluded.insert(start, value - 1);
        }
        if value < end {
            self.excluded.insert(value + 1, end);
        }
        self.excluded_count -= 1;
        Ok(true)
    }

    /// Check if an address is available for allocation
    pub fn is_free(&self, addr: IpAddr) -> bool {
        match self.hosts {
            Some(hosts) if hosts.contains(addr) => self.covering(addr_to_u128(addr)).is_none(),
            _ => false,
        }
    }

    /// Find up to `count` free addresses, lowest first, without excluding them
    pub fn find_first_fit(&self, count: usize) -> Vec<IpAddr> {
        let Some(hosts) = self.hosts else {
            return Vec::new();
        };
        let family = self.family();
        let mut found = Vec::with_capacity(count.min(1024));
        let mut cursor = hosts.start();

        while found.len() < count {
            // Jump over the interval covering the cursor
            if let Some((_, end)) = self.covering(cursor) {
                match end.checked_add(1) {
                    Some(next) if next <= hosts.end() => {
                        cursor = next;
                        continue;
                    }
                    _ => break,
                }
            }

            // The cursor is free; the gap runs up to the next excluded interval
            let gap_end = self
                .excluded
                .range(cursor..)
                .next()
                .map_or(hosts.end(), |(&start, _)| start - 1)
                .min(hosts.end());

            let wanted = (count - found.len()) as u128;
            let take_until = gap_end.min(cursor.saturating_add(wanted - 1));
            let mut value = cursor;
            loop {
                found.push(u128_to_addr(value, family));
                if value == take_until {
                    break;
                }
                value += 1;
            }

            match take_until.checked_add(1) {
                Some(next) if next <= hosts.end() => cursor = next,
                _ => break,
            }
        }

        found
    }

    /// Find and exclude up to `count` free addresses, lowest first
    ///
    /// Returns fewer than `count` addresses when the subnet runs out.
    pub fn allocate_first_fit(&mut self, count: usize) -> Vec<IpAddr> {
        let found = self.find_first_fit(count);
        for addr in &found {
            let value = addr_to_u128(*addr);
            self.merge_interval(value, value);
        }
        found
    }

    /// Number of excluded host addresses
    pub fn used_count(&self) -> AddressCount {
        self.excluded_count
    }

    /// Number of host addresses
    pub fn total_count(&self) -> AddressCount {
        self.hosts.map_or(0, |hosts| hosts.size())
    }

    /// Number of host addresses still available for allocation
    pub fn free_count(&self) -> AddressCount {
        self.total_count() - self.excluded_count
    }

    /// Excluded intervals in ascending order
    pub fn excluded_ranges(&self) -> impl Iterator<Item = AddressRange> + '_ {
        let family = self.family();
        self.excluded
            .iter()
            .map(move |(&start, &end)| AddressRange::from_raw(family, start, end))
    }

    /// Number of excluded intervals
    pub fn interval_count(&self) -> usize {
        self.excluded.len()
    }
}
