//! Subnet forest with CIDR overlap enforcement
//!
//! Subnets live in an arena keyed by id; `parent_id` is a plain foreign key.
//! Blocks are also indexed by `(family, network, prefix)`. Because CIDR
//! blocks are always either nested or disjoint, every block containing a
//! candidate is found by probing one key per shorter prefix length, and every
//! block inside it by a single ordered range scan. Overlap checks therefore
//! cost O(prefix bits * log n) instead of a scan over all subnets.

use crate::models::{addr_to_u128, AddressFamily, AddressRange, Subnet, SubnetId};
use crate::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::IpAddr;

/// How declared parents interact with the overlap rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyPolicy {
    /// All blocks are pairwise disjoint; `parent_id` is informational
    Strict,
    /// A block may sit inside its declared parent, which must be the
    /// deepest existing block containing it
    #[default]
    DeclaredAncestry,
}

impl std::str::FromStr for HierarchyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(HierarchyPolicy::Strict),
            "declared_ancestry" | "declared-ancestry" => Ok(HierarchyPolicy::DeclaredAncestry),
            other => Err(Error::Config(format!("unknown hierarchy policy '{}'", other))),
        }
    }
}

/// Block index key: family, network address, prefix length
type BlockKey = (AddressFamily, u128, u8);

fn block_key(cidr: &IpNet) -> BlockKey {
    (
        AddressFamily::of_net(cidr),
        addr_to_u128(cidr.network()),
        cidr.prefix_len(),
    )
}

/// Network address of `value` at `prefix` bits
fn mask_to_prefix(value: u128, prefix: u8, family: AddressFamily) -> u128 {
    let host_bits = u32::from(family.bits() - prefix);
    if host_bits >= 128 {
        0
    } else {
        value & !((1u128 << host_bits) - 1)
    }
}

/// The set of subnets and their hierarchy
#[derive(Debug, Clone, Default)]
pub struct SubnetForest {
    /// Subnets indexed by id
    nodes: BTreeMap<SubnetId, Subnet>,
    /// Direct children in insertion order
    children: BTreeMap<SubnetId, Vec<SubnetId>>,
    /// Subnets without a parent, in insertion order
    roots: Vec<SubnetId>,
    /// Blocks ordered by family, network and prefix
    blocks: BTreeMap<BlockKey, SubnetId>,
    /// Next id to hand out
    next_id: u64,
    policy: HierarchyPolicy,
}

impl SubnetForest {
    /// Create an empty forest
    pub fn new(policy: HierarchyPolicy) -> Self {
        Self {
            next_id: 1,
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> HierarchyPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: SubnetId) -> Option<&Subnet> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: SubnetId) -> Option<&mut Subnet> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: SubnetId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All subnets ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Subnet> {
        self.nodes.values()
    }

    /// Top-level subnets in insertion order
    pub fn roots(&self) -> &[SubnetId] {
        &self.roots
    }

    /// Find the subnet with exactly this CIDR
    pub fn find_by_cidr(&self, cidr: &IpNet) -> Option<SubnetId> {
        self.blocks.get(&block_key(&cidr.trunc())).copied()
    }

    /// Existing blocks strictly containing `cidr`, deepest first
    pub fn containers_of(&self, cidr: &IpNet) -> Vec<SubnetId> {
        let family = AddressFamily::of_net(cidr);
        let network = addr_to_u128(cidr.network());
        (0..cidr.prefix_len())
            .rev()
            .filter_map(|prefix| {
                let key = (family, mask_to_prefix(network, prefix, family), prefix);
                self.blocks.get(&key).copied()
            })
            .collect()
    }

    /// Existing blocks starting inside `range` with a prefix of at least
    /// `min_prefix` (including an identical block)
    ///
    /// A container sharing the range's start sorts inside the scan, so
    /// callers checking a CIDR pass its prefix length to skip containers.
    fn blocks_within(
        &self,
        range: &AddressRange,
        min_prefix: u8,
    ) -> impl Iterator<Item = SubnetId> + '_ {
        let family = range.family();
        self.blocks
            .range((family, range.start(), 0)..=(family, range.end(), u8::MAX))
            .filter(move |((_, _, prefix), _)| *prefix >= min_prefix)
            .map(|(_, &id)| id)
    }

    /// Deepest subnet whose block contains `addr`
    pub fn locate(&self, addr: IpAddr) -> Option<SubnetId> {
        let family = AddressFamily::of(&addr);
        let value = addr_to_u128(addr);
        (0..=family.bits()).rev().find_map(|prefix| {
            let key = (family, mask_to_prefix(value, prefix, family), prefix);
            self.blocks.get(&key).copied()
        })
    }

    /// All subnets whose block shares an address with `range`
    pub fn overlapping(&self, range: &AddressRange) -> Vec<SubnetId> {
        let family = range.family();
        let start = range.start();
        let mut found: Vec<SubnetId> = (0..=family.bits())
            .rev()
            .filter_map(|prefix| {
                let key = (family, mask_to_prefix(start, prefix, family), prefix);
                self.blocks.get(&key).copied()
            })
            .collect();
        found.extend(self.blocks_within(range, 0).filter(|id| {
            self.nodes
                .get(id)
                .map_or(false, |s| s.block_range().start() > start)
        }));
        found
    }

    fn overlap_error(&self, cidr: &IpNet, conflicting: SubnetId) -> Error {
        Error::Overlap {
            cidr: cidr.to_string(),
            conflicting,
            existing: self
                .nodes
                .get(&conflicting)
                .map(|s| s.cidr.to_string())
                .unwrap_or_default(),
        }
    }

    /// Validate where `cidr` would land
    ///
    /// Returns the deepest existing block containing it (which is then its
    /// declared parent), or `None` when the block is disjoint from all others.
    pub fn check_placement(&self, cidr: &IpNet, parent_id: Option<SubnetId>) -> Result<Option<SubnetId>> {
        if let Some(parent_id) = parent_id {
            if !self.nodes.contains_key(&parent_id) {
                return Err(Error::ParentNotFound(parent_id));
            }
            self.ancestors_of(parent_id)?;
        }

        let range = AddressRange::from_net(cidr);
        if let Some(inner) = self.blocks_within(&range, cidr.prefix_len()).next() {
            return Err(self.overlap_error(cidr, inner));
        }

        let Some(&deepest) = self.containers_of(cidr).first() else {
            return Ok(None);
        };

        match self.policy {
            HierarchyPolicy::DeclaredAncestry if parent_id == Some(deepest) => Ok(Some(deepest)),
            _ => Err(self.overlap_error(cidr, deepest)),
        }
    }

    /// Insert a subnet, assigning its id
    pub fn insert(&mut self, mut subnet: Subnet) -> Result<SubnetId> {
        subnet.cidr = subnet.cidr.trunc();
        self.check_placement(&subnet.cidr, subnet.parent_id)?;

        let id = SubnetId(self.next_id);
        self.next_id += 1;
        subnet.id = id;

        match subnet.parent_id {
            Some(parent_id) => self.children.entry(parent_id).or_default().push(id),
            None => self.roots.push(id),
        }
        self.blocks.insert(block_key(&subnet.cidr), id);
        self.nodes.insert(id, subnet);

        Ok(id)
    }

    /// Remove a subnet
    ///
    /// `owned_addresses` is the number of IP records the subnet owns; the
    /// subnet must own none and have no children.
    pub fn remove(&mut self, id: SubnetId, owned_addresses: usize) -> Result<Subnet> {
        let subnet = self.nodes.get(&id).ok_or(Error::SubnetNotFound(id))?;

        if owned_addresses > 0 {
            return Err(Error::HasAddresses {
                subnet_id: id,
                count: owned_addresses,
            });
        }

        let child_count = self.children.get(&id).map_or(0, |c| c.len());
        if child_count > 0 {
            return Err(Error::HasChildren {
                subnet_id: id,
                count: child_count,
            });
        }

        let key = block_key(&subnet.cidr);
        let parent_id = subnet.parent_id;

        self.blocks.remove(&key);
        self.children.remove(&id);
        match parent_id {
            Some(parent_id) => {
                if let Some(siblings) = self.children.get_mut(&parent_id) {
                    siblings.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }

        self.nodes.remove(&id).ok_or(Error::SubnetNotFound(id))
    }

    /// Direct children in insertion order
    pub fn children_of(&self, id: SubnetId) -> Result<&[SubnetId]> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::SubnetNotFound(id));
        }
        Ok(self.children.get(&id).map(|c| c.as_slice()).unwrap_or_default())
    }

    /// Ancestors by `parent_id`, nearest first
    pub fn ancestors_of(&self, id: SubnetId) -> Result<Vec<SubnetId>> {
        let mut current = self.nodes.get(&id).ok_or(Error::SubnetNotFound(id))?;
        let mut seen = HashSet::from([id]);
        let mut ancestors = Vec::new();

        while let Some(parent_id) = current.parent_id {
            if !seen.insert(parent_id) {
                return Err(Error::HierarchyCycle(parent_id));
            }
            current = self
                .nodes
                .get(&parent_id)
                .ok_or(Error::ParentNotFound(parent_id))?;
            ancestors.push(parent_id);
        }

        Ok(ancestors)
    }

    /// All descendants, breadth first
    pub fn descendants_of(&self, id: SubnetId) -> Result<Vec<SubnetId>> {
        let mut queue: VecDeque<SubnetId> = self.children_of(id)?.iter().copied().collect();
        let mut descendants = Vec::new();

        while let Some(next) = queue.pop_front() {
            descendants.push(next);
            if let Some(children) = self.children.get(&next) {
                queue.extend(children.iter().copied());
            }
        }

        Ok(descendants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn subnet(cidr: &str, parent: Option<SubnetId>) -> Subnet {
        let mut s = Subnet::new(IpNet::from_str(cidr).unwrap());
        s.parent_id = parent;
        s
    }

    #[test]
    fn test_insert_disjoint() {
        let mut forest = SubnetForest::new(HierarchyPolicy::Strict);
        let a = forest.insert(subnet("10.0.0.0/24", None)).unwrap();
        let b = forest.insert(subnet("10.0.1.0/24", None)).unwrap();

        assert_ne!(a, b);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.roots(), &[a, b]);
    }

    #[test]
    fn test_overlap_rejected_without_parent() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let a = forest.insert(subnet("10.0.0.0/24", None)).unwrap();

        let result = forest.insert(subnet("10.0.0.0/25", None));
        match result {
            Err(Error::Overlap { conflicting, .. }) => assert_eq!(conflicting, a),
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_supernet_rejected() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let inner = forest.insert(subnet("10.0.5.0/24", None)).unwrap();

        match forest.insert(subnet("10.0.0.0/16", None)) {
            Err(Error::Overlap { conflicting, .. }) => assert_eq!(conflicting, inner),
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_cidr_rejected() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let a = forest.insert(subnet("fd00::/64", None)).unwrap();
        assert!(matches!(
            forest.insert(subnet("fd00::/64", Some(a))),
            Err(Error::Overlap { .. })
        ));
    }

    #[test]
    fn test_declared_parent_allows_nesting() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let root = forest.insert(subnet("10.0.0.0/16", None)).unwrap();
        let child = forest.insert(subnet("10.0.1.0/24", Some(root))).unwrap();
        let grandchild = forest.insert(subnet("10.0.1.128/25", Some(child))).unwrap();

        assert_eq!(forest.children_of(root).unwrap(), &[child]);
        assert_eq!(forest.ancestors_of(grandchild).unwrap(), vec![child, root]);
        assert_eq!(forest.descendants_of(root).unwrap(), vec![child, grandchild]);
        assert_eq!(
            forest.containers_of(&IpNet::from_str("10.0.1.128/26").unwrap()),
            vec![grandchild, child, root]
        );
    }

    #[test]
    fn test_child_aligned_to_parent_network() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let root = forest.insert(subnet("10.0.0.0/24", None)).unwrap();
        let child = forest.insert(subnet("10.0.0.0/25", Some(root))).unwrap();
        let grandchild = forest.insert(subnet("10.0.0.0/26", Some(child))).unwrap();

        assert_eq!(forest.ancestors_of(grandchild).unwrap(), vec![child, root]);
        assert_eq!(forest.locate("10.0.0.1".parse().unwrap()), Some(grandchild));
        assert_eq!(forest.locate("10.0.0.100".parse().unwrap()), Some(child));

        let v6_root = forest.insert(subnet("2001:db8::/48", None)).unwrap();
        let v6_child = forest.insert(subnet("2001:db8::/64", Some(v6_root))).unwrap();
        assert_eq!(forest.children_of(v6_root).unwrap(), &[v6_child]);

        // Still rejected when the aligned parent is not the declared one
        match forest.insert(subnet("10.0.0.0/27", Some(root))) {
            Err(Error::Overlap { conflicting, .. }) => assert_eq!(conflicting, grandchild),
            other => panic!("expected overlap, got {:?}", other),
        }
        // And a supernet of an aligned block is still caught by the range scan
        match forest.insert(subnet("10.0.0.0/23", None)) {
            Err(Error::Overlap { conflicting, .. }) => assert_eq!(conflicting, root),
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_nesting_must_use_deepest_container() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let root = forest.insert(subnet("10.0.0.0/16", None)).unwrap();
        let child = forest.insert(subnet("10.0.1.0/24", Some(root))).unwrap();

        // Skipping a level would let the root hand out addresses the new block owns
        match forest.insert(subnet("10.0.1.0/26", Some(root))) {
            Err(Error::Overlap { conflicting, .. }) => assert_eq!(conflicting, child),
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_policy_rejects_nesting() {
        let mut forest = SubnetForest::new(HierarchyPolicy::Strict);
        let root = forest.insert(subnet("10.0.0.0/16", None)).unwrap();
        assert!(matches!(
            forest.insert(subnet("10.0.1.0/24", Some(root))),
            Err(Error::Overlap { .. })
        ));

        // Informational parent outside the block is fine
        let other = forest.insert(subnet("10.1.0.0/24", Some(root))).unwrap();
        assert_eq!(forest.children_of(root).unwrap(), &[other]);
    }

    #[test]
    fn test_missing_parent() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        assert!(matches!(
            forest.insert(subnet("10.0.0.0/24", Some(SubnetId(99)))),
            Err(Error::ParentNotFound(SubnetId(99)))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let mut forest = SubnetForest::new(HierarchyPolicy::Strict);
        let a = forest.insert(subnet("10.0.0.0/24", None)).unwrap();
        let b = forest.insert(subnet("10.0.1.0/24", Some(a))).unwrap();

        // Corrupt the arena to form a loop
        forest.get_mut(a).unwrap().parent_id = Some(b);

        assert!(matches!(forest.ancestors_of(b), Err(Error::HierarchyCycle(_))));
        assert!(matches!(
            forest.insert(subnet("10.0.2.0/24", Some(b))),
            Err(Error::HierarchyCycle(_))
        ));
    }

    #[test]
    fn test_remove_rules() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let root = forest.insert(subnet("10.0.0.0/16", None)).unwrap();
        let child = forest.insert(subnet("10.0.1.0/24", Some(root))).unwrap();

        assert!(matches!(
            forest.remove(root, 0),
            Err(Error::HasChildren { count: 1, .. })
        ));
        assert!(matches!(
            forest.remove(child, 3),
            Err(Error::HasAddresses { count: 3, .. })
        ));

        forest.remove(child, 0).unwrap();
        assert!(forest.children_of(root).unwrap().is_empty());
        forest.remove(root, 0).unwrap();
        assert!(forest.is_empty());
        assert!(matches!(forest.remove(root, 0), Err(Error::SubnetNotFound(_))));

        // The block is free again
        forest.insert(subnet("10.0.0.0/8", None)).unwrap();
    }

    #[test]
    fn test_locate_and_overlapping() {
        let mut forest = SubnetForest::new(HierarchyPolicy::DeclaredAncestry);
        let root = forest.insert(subnet("10.0.0.0/16", None)).unwrap();
        let child = forest.insert(subnet("10.0.1.0/24", Some(root))).unwrap();
        let other = forest.insert(subnet("10.0.2.0/24", Some(root))).unwrap();

        assert_eq!(forest.locate("10.0.1.7".parse().unwrap()), Some(child));
        assert_eq!(forest.locate("10.0.9.7".parse().unwrap()), Some(root));
        assert_eq!(forest.locate("192.168.0.1".parse().unwrap()), None);

        let range = AddressRange::parse("10.0.1.200-10.0.2.10").unwrap();
        let mut hits = forest.overlapping(&range);
        hits.sort();
        assert_eq!(hits, vec![root, child, other]);
    }

    #[test]
    fn test_ipv4_and_ipv6_never_conflict() {
        let mut forest = SubnetForest::new(HierarchyPolicy::Strict);
        forest.insert(subnet("0.0.0.0/0", None)).unwrap();
        forest.insert(subnet("::/96", None)).unwrap();
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_insert_truncates_host_bits() {
        let mut forest = SubnetForest::new(HierarchyPolicy::Strict);
        let id = forest.insert(subnet("10.0.0.9/24", None)).unwrap();
        assert_eq!(forest.get(id).unwrap().cidr.to_string(), "10.0.0.0/24");
        assert_eq!(
            forest.find_by_cidr(&IpNet::from_str("10.0.0.0/24").unwrap()),
            Some(id)
        );
    }
}
