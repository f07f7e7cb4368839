//! In-memory IP address record store
//!
//! Holds every `IpAddressRecord` keyed by id plus an ordered index from
//! address to id that enforces global address uniqueness. Batch inserts are
//! all-or-nothing.

use crate::models::{AddressRange, IpAddressRecord, IpId, IpStatus, SubnetId};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Row filter for listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilter {
    pub subnet_id: Option<SubnetId>,
    pub status: Option<IpStatus>,
    /// Case-insensitive hostname substring
    pub hostname_contains: Option<String>,
}

impl IpFilter {
    pub fn subnet(subnet_id: SubnetId) -> Self {
        Self {
            subnet_id: Some(subnet_id),
            ..Default::default()
        }
    }

    pub fn status(status: IpStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Check if a record passes the filter
    pub fn matches(&self, record: &IpAddressRecord) -> bool {
        if self.subnet_id.map_or(false, |id| record.subnet_id != id) {
            return false;
        }
        if self.status.map_or(false, |s| record.status != s) {
            return false;
        }
        match &self.hostname_contains {
            Some(needle) => record
                .hostname
                .as_deref()
                .map_or(false, |h| h.to_lowercase().contains(&needle.to_lowercase())),
            None => true,
        }
    }
}

/// Record store with a global address-uniqueness index
#[derive(Debug)]
pub struct IpStore {
    records: DashMap<IpId, IpAddressRecord>,
    by_address: RwLock<BTreeMap<IpAddr, IpId>>,
    next_id: AtomicU64,
}

impl Default for IpStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IpStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_address: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert records, assigning ids
    ///
    /// Fails with `AddressInUse` without inserting anything if any address is
    /// already recorded or repeated within the batch.
    pub fn insert_batch(&self, records: Vec<IpAddressRecord>) -> Result<Vec<IpAddressRecord>> {
        let mut by_address = self.by_address.write();

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if by_address.contains_key(&record.address) || !seen.insert(record.address) {
                return Err(Error::AddressInUse(record.address));
            }
        }

        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            record.id = IpId(self.next_id.fetch_add(1, Ordering::SeqCst));
            by_address.insert(record.address, record.id);
            self.records.insert(record.id, record.clone());
            stored.push(record);
        }

        Ok(stored)
    }

    /// Insert a single record
    pub fn insert(&self, record: IpAddressRecord) -> Result<IpAddressRecord> {
        self.insert_batch(vec![record])?
            .pop()
            .ok_or_else(|| Error::Internal("empty insert result".to_string()))
    }

    pub fn get(&self, id: IpId) -> Option<IpAddressRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Look up the record holding an address
    pub fn find_by_address(&self, addr: IpAddr) -> Option<IpId> {
        self.by_address.read().get(&addr).copied()
    }

    /// Recorded addresses inside `range`, ascending
    pub fn addresses_in(&self, range: &AddressRange) -> Vec<IpAddr> {
        self.by_address
            .read()
            .range(range.start_addr()..=range.end_addr())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Apply a fallible change to a record
    ///
    /// The closure works on a copy; the record is only replaced when it
    /// succeeds. Returns the before and after snapshots.
    pub fn update<F>(&self, id: IpId, f: F) -> Result<(IpAddressRecord, IpAddressRecord)>
    where
        F: FnOnce(&mut IpAddressRecord) -> Result<()>,
    {
        let mut entry = self.records.get_mut(&id).ok_or(Error::IpNotFound(id))?;
        let before = entry.value().clone();
        let mut after = before.clone();
        f(&mut after)?;
        after.touch();
        *entry.value_mut() = after.clone();
        Ok((before, after))
    }

    /// Remove a record and free its address for new rows
    pub fn remove(&self, id: IpId) -> Result<IpAddressRecord> {
        let (_, record) = self.records.remove(&id).ok_or(Error::IpNotFound(id))?;
        self.by_address.write().remove(&record.address);
        Ok(record)
    }

    /// Records with the given ids that still exist, in id order
    pub fn get_many<'a>(&self, ids: impl IntoIterator<Item = &'a IpId>) -> Vec<IpAddressRecord> {
        let mut records: Vec<_> = ids.into_iter().filter_map(|id| self.get(*id)).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// All records passing `filter`, ordered by id
    pub fn list(&self, filter: &IpFilter) -> Vec<IpAddressRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}
