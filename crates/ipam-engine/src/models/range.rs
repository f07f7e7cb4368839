//! Inclusive address intervals over IPv4 and IPv6
//!
//! Addresses are mapped into a single absolute integer space (`u128`), so
//! containment and overlap are plain integer comparisons regardless of how a
//! block is aligned. IPv4 values are zero-extended.

use crate::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Number of addresses in a range or block
pub type AddressCount = u128;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Family of a network
    pub fn of_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }

    /// Address width in bits
    pub fn bits(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

/// Convert an address to its absolute integer value
pub fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Convert an absolute integer value back to an address of `family`
///
/// Values come out of ranges of the same family; an IPv4 value above
/// `u32::MAX` saturates to 255.255.255.255.
pub(crate) fn u128_to_addr(value: u128, family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::V4 => {
            let v4 = u32::try_from(value);
            debug_assert!(v4.is_ok(), "IPv4 value out of range: {}", value);
            IpAddr::V4(Ipv4Addr::from(v4.unwrap_or(u32::MAX)))
        }
        AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Parse a CIDR string, masking off any host bits (`10.0.0.7/24` -> `10.0.0.0/24`)
pub fn parse_cidr(input: &str) -> Result<IpNet> {
    let net = IpNet::from_str(input.trim())?;
    let canonical = net.trunc();
    if canonical != net {
        tracing::debug!(input = %input, cidr = %canonical, "Normalized CIDR with host bits set");
    }
    Ok(canonical)
}

/// Parse a single IP address
pub fn parse_address(input: &str) -> Result<IpAddr> {
    IpAddr::from_str(input.trim()).map_err(|_| Error::InvalidAddress(input.to_string()))
}

/// Inclusive address interval `[start, end]` within one address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "RangeRepr", try_from = "RangeRepr")]
pub struct AddressRange {
    family: AddressFamily,
    start: u128,
    end: u128,
}

/// Wire form of a range: `{"start": "10.0.0.1", "end": "10.0.0.10"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RangeRepr {
    start: IpAddr,
    end: IpAddr,
}

impl From<AddressRange> for RangeRepr {
    fn from(range: AddressRange) -> Self {
        Self {
            start: range.start_addr(),
            end: range.end_addr(),
        }
    }
}

impl TryFrom<RangeRepr> for AddressRange {
    type Error = Error;

    fn try_from(repr: RangeRepr) -> Result<Self> {
        AddressRange::new(repr.start, repr.end)
    }
}

impl AddressRange {
    /// Create a range from two addresses of the same family, `start <= end`
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self> {
        let family = AddressFamily::of(&start);
        if AddressFamily::of(&end) != family {
            return Err(Error::InvalidRange(format!(
                "{} and {} are of different address families",
                start, end
            )));
        }

        let (start, end) = (addr_to_u128(start), addr_to_u128(end));
        if start > end {
            return Err(Error::InvalidRange(format!(
                "start {} is after end {}",
                u128_to_addr(start, family),
                u128_to_addr(end, family)
            )));
        }

        Ok(Self { family, start, end })
    }

    /// Create a range from raw integer bounds
    pub(crate) fn from_raw(family: AddressFamily, start: u128, end: u128) -> Self {
        debug_assert!(start <= end);
        Self { family, start, end }
    }

    /// Range holding exactly one address
    pub fn single(addr: IpAddr) -> Self {
        let value = addr_to_u128(addr);
        Self {
            family: AddressFamily::of(&addr),
            start: value,
            end: value,
        }
    }

    /// Full block of a network, `[network, broadcast]`
    pub fn from_net(net: &IpNet) -> Self {
        Self {
            family: AddressFamily::of_net(net),
            start: addr_to_u128(net.network()),
            end: addr_to_u128(net.broadcast()),
        }
    }

    /// Parse `"a-b"` or a single address
    pub fn parse(input: &str) -> Result<Self> {
        match input.split_once('-') {
            Some((start, end)) => Self::new(parse_address(start)?, parse_address(end)?),
            None => Ok(Self::single(parse_address(input)?)),
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Absolute integer value of the first address
    pub fn start(&self) -> u128 {
        self.start
    }

    /// Absolute integer value of the last address
    pub fn end(&self) -> u128 {
        self.end
    }

    pub fn start_addr(&self) -> IpAddr {
        u128_to_addr(self.start, self.family)
    }

    pub fn end_addr(&self) -> IpAddr {
        u128_to_addr(self.end, self.family)
    }

    /// Number of addresses in the range
    ///
    /// Saturates at `u128::MAX` for the one range that cannot be counted in
    /// 128 bits, the whole IPv6 space.
    pub fn size(&self) -> AddressCount {
        (self.end - self.start).saturating_add(1)
    }

    /// Check if an address lies within the range
    pub fn contains(&self, addr: IpAddr) -> bool {
        AddressFamily::of(&addr) == self.family && self.contains_value(addr_to_u128(addr))
    }

    pub(crate) fn contains_value(&self, value: u128) -> bool {
        self.start <= value && value <= self.end
    }

    /// Check if `other` lies entirely within this range
    pub fn contains_range(&self, other: &AddressRange) -> bool {
        self.family == other.family && self.start <= other.start && other.end <= self.end
    }

    /// Check if the two ranges share at least one address
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.family == other.family && self.start <= other.end && other.start <= self.end
    }

    /// The addresses shared by both ranges
    pub fn intersection(&self, other: &AddressRange) -> Option<AddressRange> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self::from_raw(
            self.family,
            self.start.max(other.start),
            self.end.min(other.end),
        ))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start_addr())
        } else {
            write!(f, "{}-{}", self.start_addr(), self.end_addr())
        }
    }
}

/// Range of assignable host addresses of a network
///
/// IPv4 blocks exclude the network and broadcast addresses, IPv6 blocks
/// exclude the subnet-router anycast (network) address. Point-to-point and
/// single-host blocks (/31, /32, /127, /128) have no host range.
pub fn host_range(net: &IpNet) -> Option<AddressRange> {
    let block = AddressRange::from_net(net);
    match net {
        IpNet::V4(v4) if v4.prefix_len() >= 31 => None,
        IpNet::V6(v6) if v6.prefix_len() >= 127 => None,
        IpNet::V4(_) => Some(AddressRange::from_raw(
            block.family,
            block.start + 1,
            block.end - 1,
        )),
        IpNet::V6(_) => Some(AddressRange::from_raw(
            block.family,
            block.start + 1,
            block.end,
        )),
    }
}

/// Sort ranges and merge the ones that overlap or touch
pub fn normalize(ranges: &[AddressRange]) -> Vec<AddressRange> {
    let mut sorted: Vec<AddressRange> = ranges.to_vec();
    sorted.sort_by_key(|r| (r.family, r.start, r.end));

    let mut merged: Vec<AddressRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last)
                if last.family == range.family
                    && last.end.checked_add(1).map_or(true, |next| next >= range.start) =>
            {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}
