//! Compute Engine reserved IP address adapter.

use std::sync::Arc;

use async_trait::async_trait;
use converge_engine::{AdapterError, Object, ObjectKey, ResourceAdapter};
use tracing::info;

use crate::client::{Address, ComputeApi, OperationPolling, last_segment, wait_for_compute_operation};
use crate::types::{IpAddressSpec, IpAddressStatus};

pub const KIND: &str = "ipaddresses";

type IpAddressObject = Object<IpAddressAdapter>;

/// Address name for an object: `<namespace>-<name>`.
pub fn address_name(key: &ObjectKey) -> String {
    format!("{}-{}", key.namespace, key.name)
}

/// Adapter for `ipaddresses` objects. Addresses are immutable, so an update
/// releases the address and reserves a new one.
pub struct IpAddressAdapter {
    compute: Arc<dyn ComputeApi>,
    polling: OperationPolling,
}

impl IpAddressAdapter {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self {
            compute,
            polling: OperationPolling::default(),
        }
    }

    pub fn with_polling(mut self, polling: OperationPolling) -> Self {
        self.polling = polling;
        self
    }
}

#[async_trait]
impl ResourceAdapter for IpAddressAdapter {
    type Spec = IpAddressSpec;
    type Status = IpAddressStatus;
    type Resource = Address;

    fn kind(&self) -> &'static str {
        KIND
    }

    fn is_cleanup_on_deletion(&self) -> bool {
        true
    }

    async fn create_resource(&self, object: &IpAddressObject) -> Result<Address, AdapterError> {
        let spec = &object.spec;
        let region = spec.region_name();
        let request = Address {
            name: address_name(&object.key),
            description: format!("IP address for object '{}'", object.key),
            network_tier: spec.network_tier.as_str().to_string(),
            // The API rejects ipVersion on regional addresses.
            ip_version: if region.is_none() {
                spec.ip_version.as_str().to_string()
            } else {
                String::new()
            },
            ..Default::default()
        };

        let op = self
            .compute
            .insert_address(&spec.project_id, region, &request)
            .await?;
        wait_for_compute_operation(self.compute.as_ref(), &spec.project_id, op, self.polling)
            .await?;
        info!(address = %request.name, region = ?region, "Reserved IP address");

        self.retrieve_resource(object)
            .await?
            .ok_or_else(|| AdapterError::api(format!("address {} vanished after creation", request.name)))
    }

    async fn retrieve_resource(
        &self,
        object: &IpAddressObject,
    ) -> Result<Option<Address>, AdapterError> {
        let spec = &object.spec;
        Ok(self
            .compute
            .get_address(
                &spec.project_id,
                spec.region_name(),
                &address_name(&object.key),
            )
            .await?)
    }

    async fn update_resource(
        &self,
        object: &IpAddressObject,
        resource: &Address,
    ) -> Result<Address, AdapterError> {
        self.delete_resource(object).await.map_err(|e| {
            AdapterError::api(format!(
                "failed releasing IP address '{}' for replacement: {}",
                resource.name, e
            ))
        })?;
        self.create_resource(object).await
    }

    async fn delete_resource(&self, object: &IpAddressObject) -> Result<(), AdapterError> {
        let spec = &object.spec;
        let name = address_name(&object.key);
        let op = self
            .compute
            .delete_address(&spec.project_id, spec.region_name(), &name)
            .await?;
        wait_for_compute_operation(self.compute.as_ref(), &spec.project_id, op, self.polling)
            .await?;
        info!(address = %name, "Released IP address");
        Ok(())
    }

    async fn is_update_needed(
        &self,
        object: &IpAddressObject,
        resource: &Address,
    ) -> Result<bool, AdapterError> {
        let spec = &object.spec;
        if resource.network_tier != spec.network_tier.as_str() {
            return Ok(true);
        }

        Ok(match (spec.region_name(), resource.region.as_deref()) {
            (None, None) => resource.ip_version != spec.ip_version.as_str(),
            (Some(wanted), Some(actual)) => last_segment(wanted) != last_segment(actual),
            _ => true,
        })
    }

    async fn is_status_update_needed(
        &self,
        object: &IpAddressObject,
        resource: &Address,
    ) -> Result<bool, AdapterError> {
        Ok(resource.address != object.status.address)
    }

    fn update_object_status(&self, object: &mut IpAddressObject, resource: &Address) {
        object.status.address = resource.address.clone();
    }
}
