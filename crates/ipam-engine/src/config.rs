//! Engine configuration
//!
//! Loaded from YAML with serde, then optionally overridden from the
//! environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `IPAM_HIERARCHY` | `hierarchy` (`strict` or `declared_ancestry`) |
//! | `IPAM_MAX_ALLOCATION_BATCH` | `max_allocation_batch` |
//! | `IPAM_MAX_PAGE_SIZE` | `max_page_size` |

use crate::allocator::HierarchyPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_HIERARCHY: &str = "IPAM_HIERARCHY";
pub const ENV_MAX_ALLOCATION_BATCH: &str = "IPAM_MAX_ALLOCATION_BATCH";
pub const ENV_MAX_PAGE_SIZE: &str = "IPAM_MAX_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Whether subnets may nest inside their declared parent
    #[serde(default)]
    pub hierarchy: HierarchyPolicy,

    /// Upper bound on addresses per allocate call
    #[serde(default = "default_max_allocation_batch")]
    pub max_allocation_batch: usize,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Buffered entries per broadcast audit subscriber
    #[serde(default = "default_audit_channel_capacity")]
    pub audit_channel_capacity: usize,
}

fn default_max_allocation_batch() -> usize {
    100
}

fn default_page_size() -> usize {
    100
}

fn default_max_page_size() -> usize {
    1000
}

fn default_audit_channel_capacity() -> usize {
    1024
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            hierarchy: HierarchyPolicy::default(),
            max_allocation_batch: default_max_allocation_batch(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            audit_channel_capacity: default_audit_channel_capacity(),
        }
    }
}

impl IpamConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, apply environment overrides and validate
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let mut config: Self = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), hierarchy = ?config.hierarchy, "Loaded IPAM config");
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_HIERARCHY) {
            self.hierarchy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MAX_ALLOCATION_BATCH) {
            self.max_allocation_batch = parse_usize(ENV_MAX_ALLOCATION_BATCH, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_PAGE_SIZE) {
            self.max_page_size = parse_usize(ENV_MAX_PAGE_SIZE, &value)?;
        }
        Ok(())
    }

    /// Check that limits are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_allocation_batch == 0 {
            return Err(Error::Config("max_allocation_batch must be at least 1".to_string()));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(Error::Config("page sizes must be at least 1".to_string()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(Error::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.audit_channel_capacity == 0 {
            return Err(Error::Config("audit_channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Clamp a requested page size to the configured bounds
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a positive integer, got '{}'", key, value)))
}
