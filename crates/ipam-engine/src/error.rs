//! Error types for address space management

use crate::models::{IpId, IpStatus, SubnetId};
use std::net::IpAddr;
use thiserror::Error;

/// Result type for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// IPAM engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Subnet errors
    #[error("Subnet not found: {0}")]
    SubnetNotFound(SubnetId),

    #[error("Parent subnet not found: {0}")]
    ParentNotFound(SubnetId),

    #[error("CIDR overlap detected: {cidr} overlaps with subnet {conflicting} ({existing})")]
    Overlap {
        cidr: String,
        conflicting: SubnetId,
        existing: String,
    },

    #[error("Subnet {subnet_id} still owns {count} IP addresses")]
    HasAddresses { subnet_id: SubnetId, count: usize },

    #[error("Subnet {subnet_id} still has {count} child subnets")]
    HasChildren { subnet_id: SubnetId, count: usize },

    #[error("Subnet hierarchy cycle detected at subnet {0}")]
    HierarchyCycle(SubnetId),

    // Input errors
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Invalid address range: {0}")]
    InvalidRange(String),

    #[error("Address family mismatch: {0} does not belong to {1}")]
    FamilyMismatch(String, String),

    // Address space errors
    #[error("{target} is outside the host range of {cidr}")]
    OutOfBounds { target: String, cidr: String },

    #[error("{0} is already excluded")]
    AlreadyExcluded(String),

    #[error("No available IPs in subnet {0}")]
    Exhausted(SubnetId),

    #[error("IP {0} is already recorded")]
    AddressInUse(IpAddr),

    #[error("IP {address} is delegated to child subnet {child}")]
    DelegatedToChild { address: IpAddr, child: SubnetId },

    // IP record errors
    #[error("IP address not found: {0}")]
    IpNotFound(IpId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: IpStatus, to: IpStatus },

    #[error("A device is required to assign IP {0}")]
    MissingDevice(IpId),

    // General errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::InvalidAddress(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}
