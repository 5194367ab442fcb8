//! REST client for Cloud DNS and Compute Engine.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    Address, Change, CloudError, ComputeApi, ComputeOperation, DnsApi, DnsOperation, ManagedZone,
    RecordSet, Result, last_segment,
};

pub const DEFAULT_DNS_ENDPOINT: &str = "https://dns.googleapis.com/dns/v1";
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSetPage {
    #[serde(default)]
    rrsets: Vec<RecordSet>,
    next_page_token: Option<String>,
}

/// Client for the Google Cloud REST APIs, authenticated with an OAuth2
/// bearer token.
pub struct GcpHttpClient {
    http: Client,
    access_token: String,
    dns_endpoint: String,
    compute_endpoint: String,
}

impl GcpHttpClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_endpoints(access_token, DEFAULT_DNS_ENDPOINT, DEFAULT_COMPUTE_ENDPOINT)
    }

    pub fn with_endpoints(
        access_token: impl Into<String>,
        dns_endpoint: impl Into<String>,
        compute_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            access_token: access_token.into(),
            dns_endpoint: dns_endpoint.into().trim_end_matches('/').to_string(),
            compute_endpoint: compute_endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!(
            "{}/projects/{}/managedZones/{}",
            self.dns_endpoint, project, zone
        )
    }

    fn addresses_url(&self, project: &str, region: Option<&str>) -> String {
        match region {
            Some(region) => format!(
                "{}/projects/{}/regions/{}/addresses",
                self.compute_endpoint,
                project,
                last_segment(region)
            ),
            None => format!(
                "{}/projects/{}/global/addresses",
                self.compute_endpoint, project
            ),
        }
    }

    fn operation_url(&self, project: &str, op: &ComputeOperation) -> String {
        if let Some(zone) = &op.zone {
            format!(
                "{}/projects/{}/zones/{}/operations/{}",
                self.compute_endpoint,
                project,
                last_segment(zone),
                op.name
            )
        } else if let Some(region) = &op.region {
            format!(
                "{}/projects/{}/regions/{}/operations/{}",
                self.compute_endpoint,
                project,
                last_segment(region),
                op.name
            )
        } else {
            format!(
                "{}/projects/{}/global/operations/{}",
                self.compute_endpoint, project, op.name
            )
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "GCP request");
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Send and decode a JSON response.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.json().await?)
    }

    /// Like [`send`](Self::send), mapping 404 to `None`.
    async fn send_optional<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(Some(response.json().await?))
    }

    /// Send a request whose response body is ignored.
    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }
}

fn status_error(status: StatusCode, body: String) -> CloudError {
    CloudError::Status {
        status: status.as_u16(),
        message: if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            body
        },
    }
}

#[async_trait]
impl DnsApi for GcpHttpClient {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<Option<ManagedZone>> {
        let url = self.zone_url(project, zone);
        self.send_optional(self.request(Method::GET, &url)).await
    }

    async fn create_zone(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone> {
        let url = format!("{}/projects/{}/managedZones", self.dns_endpoint, project);
        self.send(self.request(Method::POST, &url).json(zone)).await
    }

    async fn patch_zone(&self, project: &str, zone: &ManagedZone) -> Result<DnsOperation> {
        let url = self.zone_url(project, &zone.name);
        self.send(self.request(Method::PATCH, &url).json(zone)).await
    }

    async fn get_operation(&self, project: &str, zone: &str, id: &str) -> Result<DnsOperation> {
        let url = format!("{}/operations/{}", self.zone_url(project, zone), id);
        self.send(self.request(Method::GET, &url)).await
    }

    async fn delete_zone(&self, project: &str, zone: &str) -> Result<()> {
        let url = self.zone_url(project, zone);
        self.send_empty(self.request(Method::DELETE, &url)).await
    }

    async fn list_record_sets(&self, project: &str, zone: &str) -> Result<Vec<RecordSet>> {
        let url = format!("{}/rrsets", self.zone_url(project, zone));
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.request(Method::GET, &url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: RecordSetPage = self.send(request).await?;
            records.extend(page.rrsets);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn apply_change(&self, project: &str, zone: &str, change: &Change) -> Result<()> {
        let url = format!("{}/changes", self.zone_url(project, zone));
        self.send_empty(self.request(Method::POST, &url).json(change))
            .await
    }
}

#[async_trait]
impl ComputeApi for GcpHttpClient {
    async fn get_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<Option<Address>> {
        let url = format!("{}/{}", self.addresses_url(project, region), name);
        self.send_optional(self.request(Method::GET, &url)).await
    }

    async fn insert_address(
        &self,
        project: &str,
        region: Option<&str>,
        address: &Address,
    ) -> Result<ComputeOperation> {
        let url = self.addresses_url(project, region);
        self.send(self.request(Method::POST, &url).json(address))
            .await
    }

    async fn delete_address(
        &self,
        project: &str,
        region: Option<&str>,
        name: &str,
    ) -> Result<ComputeOperation> {
        let url = format!("{}/{}", self.addresses_url(project, region), name);
        self.send(self.request(Method::DELETE, &url)).await
    }

    async fn get_operation(
        &self,
        project: &str,
        op: &ComputeOperation,
    ) -> Result<ComputeOperation> {
        let url = self.operation_url(project, op);
        self.send(self.request(Method::GET, &url)).await
    }
}
