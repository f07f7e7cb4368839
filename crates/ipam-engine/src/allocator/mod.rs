//! Address space allocation structures
//!
//! Provides:
//! - The subnet forest (CIDR placement, overlap checks, hierarchy queries)
//! - Per-subnet free space tracking over excluded intervals
//! - The lockable per-subnet pool combining both with row bookkeeping

mod free_space;
mod pool;
mod subnet_forest;

pub use free_space::FreeSpaceIndex;
pub use pool::SubnetPool;
pub use subnet_forest::{HierarchyPolicy, SubnetForest};
