//! Data models for address space management

mod ip_address;
mod range;
mod subnet;

pub use ip_address::{
    ConflictAction, DeviceId, IpAddressRecord, IpId, IpStatus, StatusCounts,
};
pub(crate) use range::u128_to_addr;
pub use range::{
    addr_to_u128, host_range, normalize, parse_address, parse_cidr, AddressCount, AddressFamily,
    AddressRange,
};
pub use subnet::{ActorId, Subnet, SubnetId, SubnetStats};
