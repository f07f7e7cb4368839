//! Batch import and export
//!
//! Rows reference subnets by CIDR rather than id so an export can be
//! imported into another instance. Every imported row goes through the same
//! creation path as a single request: overlap checks, host range checks and
//! address uniqueness all apply. A failing row is reported and skipped; the
//! rest of the batch continues.

use crate::models::{parse_address, parse_cidr, AddressRange, DeviceId, IpStatus};
use crate::service::{CreateIpRequest, CreateSubnetRequest, IpamManager};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Portable subnet row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRow {
    pub cidr: String,
    #[serde(default)]
    pub parent_cidr: Option<String>,
    #[serde(default)]
    pub reserved_ranges: Vec<String>,
    #[serde(default)]
    pub vlan_id: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Portable IP address row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRow {
    pub address: String,
    /// Owning subnet; the deepest subnet containing the address when absent
    #[serde(default)]
    pub subnet_cidr: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub assigned_to_id: Option<u64>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
}

fn default_status() -> String {
    IpStatus::Free.as_str().to_string()
}

/// A rejected row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    /// 1-based row number
    pub row: usize,
    pub message: String,
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Ids of the created records, in row order
    pub created: Vec<u64>,
    pub errors: Vec<ImportError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, row: usize, outcome: Result<u64>) {
        match outcome {
            Ok(id) => self.created.push(id),
            Err(e) => self.errors.push(ImportError {
                row,
                message: e.to_string(),
            }),
        }
    }
}

fn subnet_request(manager: &IpamManager, row: &SubnetRow) -> Result<CreateSubnetRequest> {
    let mut request = CreateSubnetRequest::new(parse_cidr(&row.cidr)?);
    if let Some(parent) = &row.parent_cidr {
        let parent_cidr = parse_cidr(parent)?;
        let parent = manager
            .find_subnet(&parent_cidr)
            .ok_or_else(|| Error::InvalidArgument(format!("parent {} does not exist", parent_cidr)))?;
        request.parent_id = Some(parent.id);
    }
    request.reserved_ranges = row
        .reserved_ranges
        .iter()
        .map(|r| AddressRange::parse(r))
        .collect::<Result<_>>()?;
    request.vlan_id = row.vlan_id;
    request.tags = row.tags.clone();
    request.description = row.description.clone();
    request.location = row.location.clone();
    Ok(request)
}

fn ip_request(manager: &IpamManager, row: &IpRow) -> Result<CreateIpRequest> {
    let address = parse_address(&row.address)?;
    let subnet = match &row.subnet_cidr {
        Some(cidr) => {
            let cidr = parse_cidr(cidr)?;
            manager
                .find_subnet(&cidr)
                .ok_or_else(|| Error::InvalidArgument(format!("subnet {} does not exist", cidr)))?
        }
        None => manager
            .locate(address)
            .ok_or_else(|| Error::InvalidArgument(format!("no subnet contains {}", address)))?,
    };

    let mut request = CreateIpRequest::new(subnet.id, address).status(row.status.parse()?);
    request.assigned_to_id = row.assigned_to_id.map(DeviceId);
    request.hostname = row.hostname.clone();
    request.mac_address = row.mac_address.clone();
    request.interface = row.interface.clone();
    Ok(request)
}

/// Import subnets in row order; parents must precede their children
pub fn import_subnets(manager: &IpamManager, rows: &[SubnetRow]) -> ImportReport {
    let mut report = ImportReport::default();
    for (i, row) in rows.iter().enumerate() {
        let outcome = subnet_request(manager, row)
            .and_then(|request| manager.create_subnet(request))
            .map(|subnet| subnet.id.0);
        report.record(i + 1, outcome);
    }
    tracing::info!(
        created = report.created.len(),
        failed = report.errors.len(),
        "Imported subnets"
    );
    report
}

/// Import IP address rows
pub fn import_ips(manager: &IpamManager, rows: &[IpRow]) -> ImportReport {
    let engine = manager.allocation();
    let mut report = ImportReport::default();
    for (i, row) in rows.iter().enumerate() {
        let outcome = ip_request(manager, row)
            .and_then(|request| engine.create_ip(request))
            .map(|record| record.id.0);
        report.record(i + 1, outcome);
    }
    tracing::info!(
        created = report.created.len(),
        failed = report.errors.len(),
        "Imported IPs"
    );
    report
}

/// Import subnets from a JSON array of rows
pub fn import_subnets_json(manager: &IpamManager, json: &str) -> Result<ImportReport> {
    let rows: Vec<SubnetRow> =
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok(import_subnets(manager, &rows))
}

/// Import IPs from a JSON array of rows
pub fn import_ips_json(manager: &IpamManager, json: &str) -> Result<ImportReport> {
    let rows: Vec<IpRow> =
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok(import_ips(manager, &rows))
}

/// Export all subnets ordered by id
///
/// Ids grow with creation, so parents always precede their children.
pub fn export_subnets(manager: &IpamManager) -> Vec<SubnetRow> {
    let subnets = manager.list_subnets();
    let cidrs: HashMap<_, _> = subnets.iter().map(|s| (s.id, s.cidr)).collect();

    subnets
        .iter()
        .map(|s| SubnetRow {
            cidr: s.cidr.to_string(),
            parent_cidr: s
                .parent_id
                .and_then(|id| cidrs.get(&id))
                .map(|c| c.to_string()),
            reserved_ranges: s.reserved_ranges.iter().map(|r| r.to_string()).collect(),
            vlan_id: s.vlan_id,
            tags: s.tags.clone(),
            description: s.description.clone(),
            location: s.location.clone(),
        })
        .collect()
}

/// Export all IP rows ordered by id
pub fn export_ips(manager: &IpamManager) -> Vec<IpRow> {
    let engine = manager.allocation();
    let mut rows = Vec::new();
    for subnet in manager.list_subnets() {
        let Ok(records) = engine.subnet_ips(subnet.id) else {
            continue;
        };
        rows.extend(records.into_iter().map(|r| {
            (
                r.id,
                IpRow {
                    address: r.address.to_string(),
                    subnet_cidr: Some(subnet.cidr.to_string()),
                    status: r.status.as_str().to_string(),
                    assigned_to_id: r.assigned_to_id.map(|d| d.0),
                    hostname: r.hostname,
                    mac_address: r.mac_address,
                    interface: r.interface,
                },
            )
        }));
    }
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().map(|(_, row)| row).collect()
}

pub fn export_subnets_json(manager: &IpamManager) -> Result<String> {
    serde_json::to_string_pretty(&export_subnets(manager)).map_err(|e| Error::Internal(e.to_string()))
}

pub fn export_ips_json(manager: &IpamManager) -> Result<String> {
    serde_json::to_string_pretty(&export_ips(manager)).map_err(|e| Error::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet_row(cidr: &str, parent: Option<&str>) -> SubnetRow {
        SubnetRow {
            cidr: cidr.to_string(),
            parent_cidr: parent.map(str::to_string),
            reserved_ranges: Vec::new(),
            vlan_id: None,
            tags: Vec::new(),
            description: None,
            location: None,
        }
    }

    #[test]
    fn test_import_subnets_reports_rows() {
        let manager = IpamManager::new();
        let rows = vec![
            subnet_row("10.0.0.0/16", None),
            subnet_row("10.0.1.0/24", Some("10.0.0.0/16")),
            subnet_row("10.0.1.0/25", None),
            subnet_row("not-a-cidr", None),
            subnet_row("10.9.0.0/24", Some("10.8.0.0/16")),
        ];

        let report = import_subnets(&manager, &rows);
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].row, 3);
        assert!(report.errors[0].to_string().starts_with("row 3: CIDR overlap"));
        assert_eq!(report.errors[1].row, 4);
        assert_eq!(report.errors[2].row, 5);
    }

    #[test]
    fn test_import_ips() {
        let manager = IpamManager::new();
        import_subnets(&manager, &[subnet_row("10.0.0.0/24", None)]);

        let json = r#"[
            {"address": "10.0.0.1", "status": "reserved", "hostname": "gw"},
            {"address": "10.0.0.20", "status": "assigned", "assigned_to_id": 4},
            {"address": "10.0.0.21", "status": "assigned"},
            {"address": "10.0.0.1"},
            {"address": "192.168.1.1"}
        ]"#;
        let report = import_ips_json(&manager, json).unwrap();

        assert_eq!(report.created.len(), 2);
        let rows: Vec<usize> = report.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![3, 4, 5]);
    }

    #[test]
    fn test_round_trip_into_fresh_instance() {
        let source = IpamManager::new();
        let mut root = subnet_row("10.0.0.0/16", None);
        root.reserved_ranges = vec!["10.0.0.1-10.0.0.9".to_string()];
        root.vlan_id = Some(12);
        import_subnets(&source, &[root, subnet_row("10.0.4.0/24", Some("10.0.0.0/16"))]);
        import_ips(
            &source,
            &[IpRow {
                address: "10.0.4.10".to_string(),
                subnet_cidr: None,
                status: "free".to_string(),
                assigned_to_id: None,
                hostname: Some("db".to_string()),
                mac_address: None,
                interface: None,
            }],
        );

        let subnets = export_subnets(&source);
        let ips = export_ips(&source);
        assert_eq!(subnets[1].parent_cidr.as_deref(), Some("10.0.0.0/16"));
        assert_eq!(ips[0].subnet_cidr.as_deref(), Some("10.0.4.0/24"));

        let target = IpamManager::new();
        assert!(import_subnets_json(&target, &export_subnets_json(&source).unwrap())
            .unwrap()
            .is_clean());
        assert!(import_ips_json(&target, &export_ips_json(&source).unwrap())
            .unwrap()
            .is_clean());
        assert_eq!(export_subnets(&target), subnets);
        assert_eq!(export_ips(&target), ips);
    }

    #[test]
    fn test_malformed_json() {
        let manager = IpamManager::new();
        assert!(matches!(
            import_subnets_json(&manager, "{not json"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
