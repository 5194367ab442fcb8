//! Cloud API handles used by the adapters.
//!
//! Adapters receive an explicit handle at construction time:
//! - [`GcpHttpClient`]: talks to the Cloud DNS and Compute Engine REST APIs
//! - [`InMemoryCloud`]: in-process fake for development mode and tests

mod http;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use converge_engine::AdapterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use http::{DEFAULT_COMPUTE_ENDPOINT, DEFAULT_DNS_ENDPOINT, GcpHttpClient};
pub use memory::InMemoryCloud;

/// Errors returned by cloud API calls. "Not found" on lookups is `Ok(None)`.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    #[error("operation {name} did not complete after {attempts} checks")]
    OperationTimeout { name: String, attempts: u32 },
}

impl From<CloudError> for AdapterError {
    fn from(e: CloudError) -> Self {
        AdapterError::Api(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Cloud DNS managed zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedZone {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub dns_name: String,
    #[serde(default)]
    pub description: String,
}

/// Cloud DNS resource record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub rrdatas: Vec<String>,
}

/// Atomic set of record additions and deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additions: Vec<RecordSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<RecordSet>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Cloud DNS managed zone operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsOperation {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

impl DnsOperation {
    pub fn is_done(&self) -> bool {
        self.status.eq_ignore_ascii_case("done")
    }
}

/// Compute Engine reserved address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_tier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_version: String,
    /// Region URL; absent for global addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

/// Compute Engine long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOperation {
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Zone URL for zonal operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Region URL for regional operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

impl ComputeOperation {
    pub fn is_done(&self) -> bool {
        self.status.eq_ignore_ascii_case("done")
    }

    /// The error of a finished operation, if any.
    pub fn failure(&self) -> Option<String> {
        let errors = self.error.as_ref()?;
        let message = errors
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(if message.is_empty() {
            "unknown error".to_string()
        } else {
            message
        })
    }
}

/// Last path segment of a resource URL (`.../regions/europe-west1` ->
/// `europe-west1`). Plain names are returned unchanged.
pub fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Cloud DNS API.
#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<Option<ManagedZone>>;

    async fn create_zone(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone>;

    async fn patch_zone(&self, project: &str, zone: &ManagedZone) -> Result<DnsOperation>;

    async fn get_operation(&self, project: &str, zone: &str, id: &str) -> Result<DnsOperation>;

    async fn delete_zone(&self, project: &str, zone: &str) -> Result<()>;

    async fn list_record_sets(&self, project: &str, zone: &str) -> Result<Vec<RecordSet>>;

    async fn apply_change(&self, project: &str, zone: &str, change: &Change) -> Result<()>;
}

/// Compute Engine address API. `region == None` selects global addresses.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn get_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<Option<Address>>;

    async fn insert_address(
        &self,
        project: &str,
        region: Option<&str>,
        address: &Address,
    ) -> Result<ComputeOperation>;

    async fn delete_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<ComputeOperation>;

    /// Refresh an operation (global, regional or zonal).
    async fn get_operation(&self, project: &str, op: &ComputeOperation)
    -> Result<ComputeOperation>;
}

/// How long-running operations are awaited.
#[derive(Debug, Clone, Copy)]
pub struct OperationPolling {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for OperationPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 300,
        }
    }
}

/// Poll a Compute Engine operation until it is done.
pub async fn wait_for_compute_operation(
    api: &dyn ComputeApi,
    project: &str,
    op: ComputeOperation,
    polling: OperationPolling,
) -> Result<()> {
    let mut current = op;
    for attempt in 0..polling.max_attempts {
        if current.is_done() {
            return match current.failure() {
                Some(message) => Err(CloudError::OperationFailed {
                    name: current.name,
                    message,
                }),
                None => Ok(()),
            };
        }
        debug!(operation = %current.name, attempt, status = %current.status, "Waiting for compute operation");
        tokio::time::sleep(polling.interval).await;
        current = api.get_operation(project, &current).await?;
    }

    Err(CloudError::OperationTimeout {
        name: current.name,
        attempts: polling.max_attempts,
    })
}

/// Poll a Cloud DNS operation until it is done.
pub async fn wait_for_dns_operation(
    api: &dyn DnsApi,
    project: &str,
    zone: &str,
    op: DnsOperation,
    polling: OperationPolling,
) -> Result<()> {
    let mut current = op;
    for attempt in 0..polling.max_attempts {
        if current.is_done() {
            return Ok(());
        }
        debug!(operation = %current.id, attempt, status = %current.status, "Waiting for DNS operation");
        tokio::time::sleep(polling.interval).await;
        current = api.get_operation(project, zone, &current.id).await?;
    }

    Err(CloudError::OperationTimeout {
        name: current.id,
        attempts: polling.max_attempts,
    })
}
