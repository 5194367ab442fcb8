//! Cloud DNS managed zone adapter.
//!
//! A `DnsZone` object owns one managed zone and the record sets it declares.
//! Record sets present in the zone but not declared (NS, SOA, manual
//! additions) are left alone. Deleting the object leaves the zone in place.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use converge_engine::{AdapterError, Object, ObjectKey, ObjectStore, ResourceAdapter};
use tracing::{debug, info};

use crate::client::{
    Change, DnsApi, ManagedZone, OperationPolling, RecordSet, wait_for_dns_operation,
};
use crate::types::{DnsRecord, DnsZoneSpec, DnsZoneStatus, IpAddressSpec, IpAddressStatus};

pub const KIND: &str = "dnszones";

const IP_ADDRESS_REF_PREFIX: &str = "ipaddress:";
const SERVICE_REF_PREFIX: &str = "service:";

type DnsZoneObject = Object<DnsZoneAdapter>;

/// A managed zone together with its record sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAndRecords {
    pub zone: ManagedZone,
    pub records: Vec<RecordSet>,
}

impl ZoneAndRecords {
    fn find(&self, record_type: &str, name: &str) -> Option<&RecordSet> {
        self.records
            .iter()
            .find(|r| r.record_type == record_type && r.name == name)
    }
}

/// Adapter for `dnszones` objects.
pub struct DnsZoneAdapter {
    dns: Arc<dyn DnsApi>,
    ip_addresses: Arc<dyn ObjectStore<IpAddressSpec, IpAddressStatus>>,
    polling: OperationPolling,
}

impl DnsZoneAdapter {
    /// `ip_addresses` is used to resolve `ipaddress:` record references.
    pub fn new(
        dns: Arc<dyn DnsApi>,
        ip_addresses: Arc<dyn ObjectStore<IpAddressSpec, IpAddressStatus>>,
    ) -> Self {
        Self {
            dns,
            ip_addresses,
            polling: OperationPolling::default(),
        }
    }

    pub fn with_polling(mut self, polling: OperationPolling) -> Self {
        self.polling = polling;
        self
    }

    async fn resolve(&self, record: &DnsRecord) -> Result<Vec<String>, AdapterError> {
        resolve_rrdatas(record, self.ip_addresses.as_ref())
            .await
            .map_err(|e| {
                AdapterError::Other(e.context(format!(
                    "failed resolving rrdatas of {} record {}",
                    record.record_type, record.dns_name
                )))
            })
    }

    /// Desired zone as sent to the API.
    fn desired_zone(object: &DnsZoneObject) -> ManagedZone {
        ManagedZone {
            id: String::new(),
            name: zone_name(&object.key, &object.spec),
            dns_name: object.spec.dns_name.clone(),
            description: object.key.to_string(),
        }
    }

    async fn fetch(&self, project: &str, zone_name: &str) -> Result<Option<ZoneAndRecords>, AdapterError> {
        let Some(zone) = self.dns.get_zone(project, zone_name).await? else {
            return Ok(None);
        };
        let records = self.dns.list_record_sets(project, zone_name).await?;
        Ok(Some(ZoneAndRecords { zone, records }))
    }

    async fn fetch_existing(&self, object: &DnsZoneObject) -> Result<ZoneAndRecords, AdapterError> {
        let name = zone_name(&object.key, &object.spec);
        self.fetch(&object.spec.project_id, &name)
            .await?
            .ok_or_else(|| AdapterError::api(format!("managed zone {} vanished", name)))
    }
}

/// Managed zone name: the declared one, or `<namespace>-<name>`.
pub fn zone_name(key: &ObjectKey, spec: &DnsZoneSpec) -> String {
    match spec.zone_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}-{}", key.namespace, key.name),
    }
}

/// Resolve the rrdatas of a declared record.
///
/// Non-A records are returned as-is. `ipaddress:<ns>/<name>` entries of an
/// A record are replaced with the referenced object's address; the address
/// must already be allocated.
pub async fn resolve_rrdatas(
    record: &DnsRecord,
    ip_addresses: &dyn ObjectStore<IpAddressSpec, IpAddressStatus>,
) -> anyhow::Result<Vec<String>> {
    if record.record_type != "A" {
        return Ok(record.rrdatas.clone());
    }
    if record.rrdatas.is_empty() {
        return Err(anyhow!("record has no rrdatas"));
    }

    let mut resolved = Vec::with_capacity(record.rrdatas.len());
    for rrdata in &record.rrdatas {
        if let Some(reference) = rrdata.strip_prefix(IP_ADDRESS_REF_PREFIX) {
            let key: ObjectKey = reference.parse()?;
            let address = ip_addresses
                .get(&key)
                .await?
                .ok_or_else(|| anyhow!("referenced IP address '{}' does not exist", key))?;
            if address.status.address.is_empty() {
                return Err(anyhow!("IP address '{}' is not ready yet", key));
            }
            resolved.push(address.status.address);
        } else if rrdata.starts_with(SERVICE_REF_PREFIX) {
            return Err(anyhow!("unsupported rrdata reference '{}'", rrdata));
        } else {
            resolved.push(rrdata.clone());
        }
    }

    Ok(resolved)
}

fn desired_record(record: &DnsRecord, rrdatas: Vec<String>) -> RecordSet {
    RecordSet {
        name: record.dns_name.clone(),
        record_type: record.record_type.clone(),
        ttl: record.ttl,
        rrdatas,
    }
}

#[async_trait]
impl ResourceAdapter for DnsZoneAdapter {
    type Spec = DnsZoneSpec;
    type Status = DnsZoneStatus;
    type Resource = ZoneAndRecords;

    fn kind(&self) -> &'static str {
        KIND
    }

    fn is_cleanup_on_deletion(&self) -> bool {
        false
    }

    async fn create_resource(&self, object: &DnsZoneObject) -> Result<ZoneAndRecords, AdapterError> {
        let project = &object.spec.project_id;
        let zone = Self::desired_zone(object);

        // Resolve first so an unready reference does not leave a bare zone.
        let mut change = Change::default();
        for record in &object.spec.records {
            let rrdatas = self.resolve(record).await?;
            change.additions.push(desired_record(record, rrdatas));
        }

        self.dns.create_zone(project, &zone).await?;
        info!(zone = %zone.name, project = %project, "Created managed zone");

        if !change.is_empty() {
            self.dns.apply_change(project, &zone.name, &change).await?;
            debug!(zone = %zone.name, records = change.additions.len(), "Added record sets");
        }

        self.fetch_existing(object).await
    }

    async fn retrieve_resource(
        &self,
        object: &DnsZoneObject,
    ) -> Result<Option<ZoneAndRecords>, AdapterError> {
        self.fetch(
            &object.spec.project_id,
            &zone_name(&object.key, &object.spec),
        )
        .await
    }

    async fn update_resource(
        &self,
        object: &DnsZoneObject,
        resource: &ZoneAndRecords,
    ) -> Result<ZoneAndRecords, AdapterError> {
        let project = &object.spec.project_id;
        let zone = Self::desired_zone(object);

        let op = self.dns.patch_zone(project, &zone).await?;
        wait_for_dns_operation(self.dns.as_ref(), project, &zone.name, op, self.polling).await?;

        for record in &object.spec.records {
            let rrdatas = self.resolve(record).await?;
            let change = match resource.find(&record.record_type, &record.dns_name) {
                Some(existing) if existing.ttl == record.ttl && existing.rrdatas == rrdatas => {
                    continue;
                }
                Some(existing) => Change {
                    deletions: vec![existing.clone()],
                    additions: vec![desired_record(record, rrdatas)],
                },
                None => Change {
                    deletions: vec![],
                    additions: vec![desired_record(record, rrdatas)],
                },
            };
            self.dns.apply_change(project, &zone.name, &change).await?;
            debug!(zone = %zone.name, record = %record.dns_name, kind = %record.record_type, "Applied record set");
        }

        self.fetch_existing(object).await
    }

    async fn delete_resource(&self, object: &DnsZoneObject) -> Result<(), AdapterError> {
        let name = zone_name(&object.key, &object.spec);
        self.dns.delete_zone(&object.spec.project_id, &name).await?;
        info!(zone = %name, "Deleted managed zone");
        Ok(())
    }

    async fn is_update_needed(
        &self,
        object: &DnsZoneObject,
        resource: &ZoneAndRecords,
    ) -> Result<bool, AdapterError> {
        if resource.zone.dns_name != object.spec.dns_name {
            return Ok(true);
        }
        if resource.zone.description != object.key.to_string() {
            return Ok(true);
        }

        for record in &object.spec.records {
            let rrdatas = self.resolve(record).await?;
            match resource.find(&record.record_type, &record.dns_name) {
                Some(existing) if existing.ttl == record.ttl && existing.rrdatas == rrdatas => {}
                _ => return Ok(true),
            }
        }

        Ok(false)
    }

    async fn is_status_update_needed(
        &self,
        object: &DnsZoneObject,
        resource: &ZoneAndRecords,
    ) -> Result<bool, AdapterError> {
        Ok(resource.zone.id != object.status.id || resource.zone.name != object.status.zone_name)
    }

    fn update_object_status(&self, object: &mut DnsZoneObject, resource: &ZoneAndRecords) {
        object.status.id = resource.zone.id.clone();
        object.status.zone_name = resource.zone.name.clone();
    }
}
