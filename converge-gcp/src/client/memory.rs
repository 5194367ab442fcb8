//! In-process cloud used in development mode and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    Address, Change, CloudError, ComputeApi, ComputeOperation, DnsApi, DnsOperation, ManagedZone,
    RecordSet, Result, last_segment,
};

const REGION_URL_PREFIX: &str = "https://www.googleapis.com/compute/v1/projects";

type ZoneKey = (String, String);
type AddressKey = (String, Option<String>, String);

struct HostedZone {
    zone: ManagedZone,
    records: Vec<RecordSet>,
}

#[derive(Default)]
struct CloudState {
    zones: HashMap<ZoneKey, HostedZone>,
    addresses: HashMap<AddressKey, Address>,
    next_id: u64,
}

impl CloudState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Deterministic fake of the Cloud DNS and Compute Engine APIs.
///
/// Operations complete immediately. Zone ids count up from 1000; IPv4
/// addresses are handed out from 203.0.113.0/24 and IPv6 addresses from
/// 2001:db8::/32.
#[derive(Default)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
    unavailable: AtomicBool,
}

fn not_found(what: &str) -> CloudError {
    CloudError::Status {
        status: 404,
        message: format!("{} not found", what),
    }
}

fn conflict(what: &str) -> CloudError {
    CloudError::Status {
        status: 409,
        message: format!("{} already exists", what),
    }
}

fn invalid(message: String) -> CloudError {
    CloudError::Status {
        status: 400,
        message,
    }
}

fn done(name: String, region: Option<String>) -> ComputeOperation {
    ComputeOperation {
        name,
        status: "DONE".to_string(),
        zone: None,
        region,
        error: None,
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CloudState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CloudError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every API call fail with 503 until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Zone as stored, bypassing availability.
    pub fn zone(&self, project: &str, zone: &str) -> Option<ManagedZone> {
        self.state()
            .zones
            .get(&(project.to_string(), zone.to_string()))
            .map(|z| z.zone.clone())
    }

    /// Record sets of a zone, bypassing availability.
    pub fn records(&self, project: &str, zone: &str) -> Vec<RecordSet> {
        self.state()
            .zones
            .get(&(project.to_string(), zone.to_string()))
            .map(|z| z.records.clone())
            .unwrap_or_default()
    }

    /// Address as stored, bypassing availability.
    pub fn address(&self, project: &str, region: Option<&str>, name: &str) -> Option<Address> {
        self.state()
            .addresses
            .get(&address_key(project, region, name))
            .cloned()
    }

    /// Change a zone out of band.
    pub fn edit_zone(&self, project: &str, zone: &str, edit: impl FnOnce(&mut ManagedZone)) {
        if let Some(hosted) = self
            .state()
            .zones
            .get_mut(&(project.to_string(), zone.to_string()))
        {
            edit(&mut hosted.zone);
        }
    }

    /// Change the record sets of a zone out of band.
    pub fn edit_records(&self, project: &str, zone: &str, edit: impl FnOnce(&mut Vec<RecordSet>)) {
        if let Some(hosted) = self
            .state()
            .zones
            .get_mut(&(project.to_string(), zone.to_string()))
        {
            edit(&mut hosted.records);
        }
    }

    /// Delete an address out of band.
    pub fn remove_address(&self, project: &str, region: Option<&str>, name: &str) {
        self.state()
            .addresses
            .remove(&address_key(project, region, name));
    }
}

fn address_key(project: &str, region: Option<&str>, name: &str) -> AddressKey {
    (
        project.to_string(),
        region.map(|r| last_segment(r).to_string()),
        name.to_string(),
    )
}

#[async_trait]
impl DnsApi for InMemoryCloud {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<Option<ManagedZone>> {
        let state = self.lock()?;
        Ok(state
            .zones
            .get(&(project.to_string(), zone.to_string()))
            .map(|z| z.zone.clone()))
    }

    async fn create_zone(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone> {
        if !zone.dns_name.ends_with('.') {
            return Err(invalid(format!(
                "dnsName '{}' must be fully qualified (end with a dot)",
                zone.dns_name
            )));
        }

        let mut state = self.lock()?;
        let key = (project.to_string(), zone.name.clone());
        if state.zones.contains_key(&key) {
            return Err(conflict(&format!("managed zone {}", zone.name)));
        }

        let id = 999 + state.next_id();
        let created = ManagedZone {
            id: id.to_string(),
            ..zone.clone()
        };
        let records = vec![
            RecordSet {
                name: zone.dns_name.clone(),
                record_type: "NS".to_string(),
                ttl: 21600,
                rrdatas: vec!["ns-cloud-a1.googledomains.com.".to_string()],
            },
            RecordSet {
                name: zone.dns_name.clone(),
                record_type: "SOA".to_string(),
                ttl: 21600,
                rrdatas: vec![format!(
                    "ns-cloud-a1.googledomains.com. cloud-dns-hostmaster.google.com. {} 21600 3600 259200 300",
                    id
                )],
            },
        ];
        state.zones.insert(
            key,
            HostedZone {
                zone: created.clone(),
                records,
            },
        );
        Ok(created)
    }

    async fn patch_zone(&self, project: &str, zone: &ManagedZone) -> Result<DnsOperation> {
        let mut state = self.lock()?;
        let op_id = state.next_id().to_string();
        let hosted = state
            .zones
            .get_mut(&(project.to_string(), zone.name.clone()))
            .ok_or_else(|| not_found(&format!("managed zone {}", zone.name)))?;

        hosted.zone.dns_name = zone.dns_name.clone();
        hosted.zone.description = zone.description.clone();
        Ok(DnsOperation {
            id: op_id,
            status: "done".to_string(),
        })
    }

    async fn get_operation(&self, _project: &str, _zone: &str, id: &str) -> Result<DnsOperation> {
        self.lock()?;
        Ok(DnsOperation {
            id: id.to_string(),
            status: "done".to_string(),
        })
    }

    async fn delete_zone(&self, project: &str, zone: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .zones
            .remove(&(project.to_string(), zone.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(&format!("managed zone {}", zone)))
    }

    async fn list_record_sets(&self, project: &str, zone: &str) -> Result<Vec<RecordSet>> {
        let state = self.lock()?;
        state
            .zones
            .get(&(project.to_string(), zone.to_string()))
            .map(|z| z.records.clone())
            .ok_or_else(|| not_found(&format!("managed zone {}", zone)))
    }

    async fn apply_change(&self, project: &str, zone: &str, change: &Change) -> Result<()> {
        if change.is_empty() {
            return Err(invalid("change has no additions or deletions".to_string()));
        }

        let mut state = self.lock()?;
        let hosted = state
            .zones
            .get_mut(&(project.to_string(), zone.to_string()))
            .ok_or_else(|| not_found(&format!("managed zone {}", zone)))?;

        // Validate the whole change before touching anything.
        let mut records = hosted.records.clone();
        for deletion in &change.deletions {
            let index = records
                .iter()
                .position(|r| r == deletion)
                .ok_or_else(|| {
                    CloudError::Status {
                        status: 412,
                        message: format!(
                            "record set {} {} does not match the deletion",
                            deletion.record_type, deletion.name
                        ),
                    }
                })?;
            records.remove(index);
        }
        for addition in &change.additions {
            if records
                .iter()
                .any(|r| r.name == addition.name && r.record_type == addition.record_type)
            {
                return Err(conflict(&format!(
                    "record set {} {}",
                    addition.record_type, addition.name
                )));
            }
            records.push(addition.clone());
        }

        hosted.records = records;
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for InMemoryCloud {
    async fn get_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<Option<Address>> {
        let state = self.lock()?;
        Ok(state
            .addresses
            .get(&address_key(project, region, name))
            .cloned())
    }

    async fn insert_address(
        &self,
        project: &str,
        region: Option<&str>,
        address: &Address,
    ) -> Result<ComputeOperation> {
        let mut state = self.lock()?;
        let key = address_key(project, region, &address.name);
        if state.addresses.contains_key(&key) {
            return Err(conflict(&format!("address {}", address.name)));
        }

        let n = state.next_id();
        // Regional addresses are always IPv4.
        let ip_version = match (region, address.ip_version.as_str()) {
            (None, "IPV6") => "IPV6",
            _ => "IPV4",
        };
        let ip = match ip_version {
            "IPV6" => format!("2001:db8::{:x}", n),
            _ => format!("203.0.113.{}", n % 254 + 1),
        };
        let region_url = key
            .1
            .as_ref()
            .map(|r| format!("{}/{}/regions/{}", REGION_URL_PREFIX, project, r));

        let stored = Address {
            name: address.name.clone(),
            description: address.description.clone(),
            address: ip,
            network_tier: if address.network_tier.is_empty() {
                "PREMIUM".to_string()
            } else {
                address.network_tier.clone()
            },
            ip_version: ip_version.to_string(),
            region: region_url.clone(),
        };
        state.addresses.insert(key, stored);

        Ok(done(format!("operation-insert-{}", n), region_url))
    }

    async fn delete_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<ComputeOperation> {
        let mut state = self.lock()?;
        let n = state.next_id();
        let key = address_key(project, region, name);
        let removed = state
            .addresses
            .remove(&key)
            .ok_or_else(|| not_found(&format!("address {}", name)))?;
        Ok(done(format!("operation-delete-{}", n), removed.region))
    }

    async fn get_operation(
        &self,
        _project: &str,
        op: &ComputeOperation,
    ) -> Result<ComputeOperation> {
        self.lock()?;
        Ok(done(op.name.clone(), op.region.clone()))
    }
}
